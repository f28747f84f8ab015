//! ONE_OR_MORE (Kleene plus) states and NFA fan-out

use kairos_runtime::{
    ConsumptionPolicy, Engine, Event, EventId, PartitionKey, PatternGraph, Predicate, Quantifier,
};
use rustc_hash::FxHashMap;
use std::time::Duration;

fn start_then_ticks_then_end(policy: ConsumptionPolicy) -> PatternGraph {
    let mut builder = PatternGraph::builder();
    let start = builder.add_state("start", Predicate::event_type("START"));
    let ticks = builder.add_quantified_state("ticks", Predicate::event_type("TICK"), Quantifier::OneOrMore);
    let end = builder.add_state("end", Predicate::event_type("END"));
    builder
        .add_transition(start, ticks)
        .add_transition(ticks, end)
        .policy(policy);
    builder.build().unwrap()
}

fn assert_refcounts_conserved<S: kairos_runtime::MatchSink>(engine: &Engine<S>) {
    let mut expected: FxHashMap<EventId, usize> = FxHashMap::default();
    for instance in engine.live_instances() {
        for id in instance.matched_ids() {
            *expected.entry(id).or_default() += 1;
        }
    }
    assert_eq!(engine.store().len(), expected.len());
    for (id, count) in expected {
        assert_eq!(engine.store().ref_count(id), count);
    }
}

#[test]
fn three_qualifying_events_give_three_growing_branches() {
    let mut engine = Engine::collecting(
        start_then_ticks_then_end(ConsumptionPolicy::NoSkip),
        Duration::ZERO,
    );
    let start = Event::new("k", "START", 1).into_shared();
    let ticks: Vec<_> = (2..=4).map(|t| Event::new("k", "TICK", t).into_shared()).collect();

    engine.ingest(start.clone());
    for tick in &ticks {
        engine.ingest(tick.clone());
    }

    let key = PartitionKey::from("k");
    let chains: Vec<Vec<EventId>> = engine
        .instances()
        .live_instances(&key)
        .iter()
        .filter(|i| engine.pattern().state(i.state()).name() == "ticks")
        .map(|i| i.matched_ids())
        .collect();

    // skip-till-any-match: every subset of ticks is a branch, and the
    // contiguous run grows one event at a time
    assert_eq!(chains.len(), 7);
    for len in 1..=3 {
        let mut growing = vec![start.id];
        growing.extend(ticks[..len].iter().map(|t| t.id));
        assert!(chains.contains(&growing), "missing branch of {} ticks", len);
    }

    let ids: Vec<_> = engine
        .instances()
        .live_instances(&key)
        .iter()
        .map(|i| i.id())
        .collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len(), "every branch has its own identity");

    assert_refcounts_conserved(&engine);
}

#[test]
fn every_branch_completes_under_no_skip() {
    let mut engine = Engine::collecting(
        start_then_ticks_then_end(ConsumptionPolicy::NoSkip),
        Duration::ZERO,
    );
    engine.ingest(Event::new("k", "START", 1));
    engine.ingest(Event::new("k", "TICK", 2));
    engine.ingest(Event::new("k", "TICK", 3));
    engine.ingest(Event::new("k", "END", 4));

    let mut lengths: Vec<usize> = engine.sink().matches().iter().map(|m| m.len()).collect();
    lengths.sort_unstable();
    // [START TICK2 END], [START TICK3 END], [START TICK2 TICK3 END]
    assert_eq!(lengths, vec![3, 3, 4]);
    assert_refcounts_conserved(&engine);
}

#[test]
fn skip_past_last_event_consumes_every_overlapping_branch() {
    let mut engine = Engine::collecting(
        start_then_ticks_then_end(ConsumptionPolicy::SkipPastLastEvent),
        Duration::ZERO,
    );
    engine.ingest(Event::new("k", "START", 1));
    engine.ingest(Event::new("k", "TICK", 2));
    engine.ingest(Event::new("k", "TICK", 3));
    engine.ingest(Event::new("k", "END", 4));
    engine.ingest(Event::new("k", "END", 5));

    // every tick branch completes on END@4 in the same pass, then
    // everything that touched START@1 is consumed
    assert_eq!(engine.sink().len(), 3);
    assert_eq!(engine.stats().live_instances, 0);
    assert!(engine.store().is_empty());
}

#[test]
fn kleene_start_state_with_window() {
    let mut builder = PatternGraph::builder();
    let hot = builder.add_quantified_state(
        "hot",
        Predicate::event_type("TEMP").and(Predicate::compare(
            "celsius",
            kairos_runtime::CompareOp::Gt,
            90,
        )),
        Quantifier::OneOrMore,
    );
    let alarm = builder.add_state("alarm", Predicate::event_type("ALARM"));
    builder
        .add_transition(hot, alarm)
        .window(Duration::from_millis(100))
        .policy(ConsumptionPolicy::NoSkip);
    let mut engine = Engine::collecting(builder.build().unwrap(), Duration::ZERO);

    engine.ingest(Event::new("sensor", "TEMP", 0).with_field("celsius", 95));
    engine.ingest(Event::new("sensor", "TEMP", 50).with_field("celsius", 20));
    engine.ingest(Event::new("sensor", "TEMP", 60).with_field("celsius", 99));
    // offered to every live instance before the instances started at 0 are
    // evicted at watermark 120
    engine.ingest(Event::new("sensor", "ALARM", 120));

    let times: Vec<Vec<i64>> = engine
        .sink()
        .matches()
        .iter()
        .map(|m| m.events().iter().map(|e| e.event_time).collect())
        .collect();
    assert_eq!(times, vec![vec![0, 120], vec![0, 60, 120], vec![60, 120]]);
    assert_eq!(engine.stats().instances_evicted, 2);

    let live: Vec<i64> = engine.live_instances().map(|i| i.start_time()).collect();
    assert_eq!(live, vec![60]);
    assert_refcounts_conserved(&engine);
}

#[test]
fn fan_out_fires_all_matching_transitions() {
    let mut builder = PatternGraph::builder();
    let login = builder.add_state("login", Predicate::event_type("LOGIN"));
    let any_purchase = builder.add_state("any_purchase", Predicate::event_type("PURCHASE"));
    let big_purchase = builder.add_state(
        "big_purchase",
        Predicate::event_type("PURCHASE").and(Predicate::compare(
            "amount",
            kairos_runtime::CompareOp::Ge,
            1000,
        )),
    );
    builder
        .add_transition(login, any_purchase)
        .add_transition(login, big_purchase)
        .policy(ConsumptionPolicy::NoSkip);
    let mut engine = Engine::collecting(builder.build().unwrap(), Duration::ZERO);

    engine.ingest(Event::new("u", "LOGIN", 1));
    engine.ingest(Event::new("u", "PURCHASE", 2).with_field("amount", 5_000));

    assert_eq!(engine.sink().len(), 2, "both terminal targets complete");
    assert_eq!(engine.stats().live_instances, 1);
    assert_refcounts_conserved(&engine);
}
