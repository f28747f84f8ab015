//! Engine: composition root wiring the orderer, instance manager and store
//!
//! Every call runs the whole pipeline before returning:
//!
//! 1. the orderer buffers the event and may move the watermark
//! 2. whatever the watermark released is offered to the instance manager in
//!    event-time order, matches going straight to the sink
//! 3. if the watermark moved, expired instances are evicted
//!
//! Eviction always comes last so an instance sees every event its window
//! covers before it is dropped.

use crate::config::EngineConfig;
use crate::event::SharedEvent;
use crate::instance::AutomatonInstance;
use crate::manager::{InstanceManager, ManagerStats};
use crate::orderer::TemporalOrderer;
use crate::pattern::PatternGraph;
use crate::sink::{CollectingSink, MatchSink};
use crate::store::SharedEventStore;
use kairos_core::{duration_millis, EventTime, Watermark};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Point-in-time counters of an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub events_ingested: u64,
    pub events_released: u64,
    pub late_events: u64,
    pub matches_emitted: u64,
    pub instances_evicted: u64,
    pub discarded_by_policy: u64,
    pub discarded_by_cap: u64,
    pub live_instances: usize,
    pub stored_events: usize,
    pub buffered_events: usize,
    pub watermark: EventTime,
}

/// Out-of-order pattern matching engine for a single pattern.
pub struct Engine<S: MatchSink = CollectingSink> {
    orderer: TemporalOrderer,
    manager: InstanceManager,
    store: SharedEventStore,
    sink: S,
    events_ingested: u64,
    events_released: u64,
}

impl<S: MatchSink> Engine<S> {
    pub fn new(
        pattern: impl Into<Arc<PatternGraph>>,
        max_out_of_orderness: Duration,
        sink: S,
    ) -> Self {
        Self::assemble(pattern.into(), max_out_of_orderness, None, sink)
    }

    pub fn from_config(
        pattern: impl Into<Arc<PatternGraph>>,
        config: &EngineConfig,
        sink: S,
    ) -> Self {
        Self::assemble(
            pattern.into(),
            config.max_out_of_orderness(),
            config.max_instances_per_key,
            sink,
        )
    }

    fn assemble(
        pattern: Arc<PatternGraph>,
        max_out_of_orderness: Duration,
        max_instances_per_key: Option<usize>,
        sink: S,
    ) -> Self {
        info!(
            states = pattern.states().len(),
            window_ms = ?pattern.window_millis(),
            policy = ?pattern.policy(),
            max_out_of_orderness_ms = duration_millis(max_out_of_orderness),
            max_instances_per_key = ?max_instances_per_key,
            sink = sink.name(),
            "engine created"
        );
        Self {
            orderer: TemporalOrderer::new(max_out_of_orderness),
            manager: InstanceManager::new(pattern)
                .with_max_instances_per_key(max_instances_per_key),
            store: SharedEventStore::new(),
            sink,
            events_ingested: 0,
            events_released: 0,
        }
    }

    /// Feeds one event through the pipeline. Matches it completes, directly
    /// or by releasing earlier events, reach the sink before this returns.
    pub fn ingest(&mut self, event: impl Into<SharedEvent>) {
        let event = event.into();
        debug!(event = %event, "ingest");
        self.events_ingested += 1;

        let before = self.orderer.watermark();
        let released = self.orderer.ingest(event);
        self.run(before, released);
    }

    /// Moves the watermark to `timestamp` without an event, releasing and
    /// evicting whatever that covers. Earlier timestamps are ignored.
    pub fn advance_watermark(&mut self, timestamp: EventTime) {
        let before = self.orderer.watermark();
        let released = self.orderer.advance_to(timestamp);
        self.run(before, released);
    }

    /// Treats the stream as finished: releases every buffered event and
    /// evicts up to the latest event time seen.
    pub fn flush(&mut self) {
        let before = self.orderer.watermark();
        let released = self.orderer.flush();
        self.run(before, released);
        self.sink.flush();
    }

    fn run(&mut self, before: Watermark, released: Vec<SharedEvent>) {
        self.events_released += released.len() as u64;
        for event in &released {
            self.manager
                .process_event(event, &mut self.store, &mut self.sink);
        }

        let after = self.orderer.watermark();
        if after.current() > before.current() {
            self.manager.evict_expired(after.current(), &mut self.store);
        }
    }

    pub fn stats(&self) -> EngineStats {
        let ManagerStats {
            matches_emitted,
            evicted,
            discarded_by_policy,
            discarded_by_cap,
            ..
        } = self.manager.stats();

        EngineStats {
            events_ingested: self.events_ingested,
            events_released: self.events_released,
            late_events: self.orderer.late_events(),
            matches_emitted,
            instances_evicted: evicted,
            discarded_by_policy,
            discarded_by_cap,
            live_instances: self.manager.live_count(),
            stored_events: self.store.len(),
            buffered_events: self.orderer.buffered_len(),
            watermark: self.orderer.watermark().current(),
        }
    }

    pub fn watermark(&self) -> Watermark {
        self.orderer.watermark()
    }

    pub fn pattern(&self) -> &Arc<PatternGraph> {
        self.manager.pattern()
    }

    pub fn store(&self) -> &SharedEventStore {
        &self.store
    }

    pub fn instances(&self) -> &InstanceManager {
        &self.manager
    }

    pub fn live_instances(&self) -> impl Iterator<Item = &AutomatonInstance> + '_ {
        self.manager.iter_live()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl Engine<CollectingSink> {
    /// Engine collecting its matches in memory.
    pub fn collecting(pattern: impl Into<Arc<PatternGraph>>, max_out_of_orderness: Duration) -> Self {
        Self::new(pattern, max_out_of_orderness, CollectingSink::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::pattern::{ConsumptionPolicy, Predicate};

    fn login_then_purchase() -> PatternGraph {
        let mut builder = PatternGraph::builder();
        let a = builder.add_state("A", Predicate::event_type("LOGIN"));
        let b = builder.add_state("B", Predicate::event_type("PURCHASE"));
        builder
            .add_transition(a, b)
            .window(Duration::from_secs(10))
            .policy(ConsumptionPolicy::SkipPastLastEvent);
        builder.build().unwrap()
    }

    #[test]
    fn test_nothing_processed_before_watermark() {
        let mut engine = Engine::collecting(login_then_purchase(), Duration::from_secs(5));
        engine.ingest(Event::new("u1", "LOGIN", 10_000));
        engine.ingest(Event::new("u1", "PURCHASE", 11_000));

        let stats = engine.stats();
        assert_eq!(stats.events_ingested, 2);
        assert_eq!(stats.events_released, 0);
        assert_eq!(stats.buffered_events, 2);
        assert_eq!(stats.live_instances, 0);
        assert!(engine.sink().is_empty());
    }

    #[test]
    fn test_flush_completes_pending_match() {
        let mut engine = Engine::collecting(login_then_purchase(), Duration::from_secs(5));
        engine.ingest(Event::new("u1", "LOGIN", 10_000));
        engine.ingest(Event::new("u1", "PURCHASE", 11_000));
        engine.flush();

        assert_eq!(engine.sink().len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.matches_emitted, 1);
        assert_eq!(stats.buffered_events, 0);
        assert_eq!(stats.stored_events, 0);
        assert_eq!(stats.watermark, 11_000);
    }

    #[test]
    fn test_advance_watermark_evicts() {
        let mut engine = Engine::collecting(login_then_purchase(), Duration::ZERO);
        engine.ingest(Event::new("u1", "LOGIN", 1_000));
        assert_eq!(engine.stats().live_instances, 1);

        engine.advance_watermark(10_999);
        assert_eq!(engine.stats().live_instances, 1);
        engine.advance_watermark(11_000);
        let stats = engine.stats();
        assert_eq!(stats.live_instances, 0);
        assert_eq!(stats.instances_evicted, 1);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_released_events_are_offered_before_eviction() {
        let mut engine = Engine::collecting(login_then_purchase(), Duration::from_secs(5));
        engine.ingest(Event::new("u1", "LOGIN", 10_000));
        engine.ingest(Event::new("u1", "PURCHASE", 20_000));

        // releases PURCHASE@20s and reaches LOGIN's expiry in the same call
        engine.advance_watermark(20_000);
        let stats = engine.stats();
        assert_eq!(stats.matches_emitted, 1);
        assert_eq!(stats.instances_evicted, 0);
        assert_eq!(stats.stored_events, 0);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_huge_lateness_is_logged_saturated() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let engine = tracing::subscriber::with_default(subscriber, || {
            Engine::collecting(login_then_purchase(), Duration::from_secs(u64::MAX))
        });

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains(&format!("max_out_of_orderness_ms={}", i64::MAX)),
            "{}",
            output
        );
        assert_eq!(engine.watermark().current(), -1);
    }

    #[test]
    fn test_from_config_applies_cap() {
        let config = EngineConfig {
            max_out_of_orderness_ms: 0,
            max_instances_per_key: Some(1),
            ..EngineConfig::default()
        };
        let mut engine = Engine::from_config(login_then_purchase(), &config, CollectingSink::new());
        engine.ingest(Event::new("u1", "LOGIN", 1));
        engine.ingest(Event::new("u1", "LOGIN", 2));

        let stats = engine.stats();
        assert_eq!(stats.live_instances, 1);
        assert_eq!(stats.discarded_by_cap, 1);
    }

    #[test]
    fn test_boxed_sink() {
        let sink: Box<dyn MatchSink> = Box::new(CollectingSink::new());
        let mut engine = Engine::new(login_then_purchase(), Duration::ZERO, sink);
        engine.ingest(Event::new("u1", "LOGIN", 1));
        engine.ingest(Event::new("u1", "PURCHASE", 2));
        assert_eq!(engine.stats().matches_emitted, 1);
        assert_eq!(engine.sink().name(), "collect");
    }
}
