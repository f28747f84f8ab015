//! Per-key execution of the pattern automaton
//!
//! The manager owns every live [`AutomatonInstance`], grouped by partition
//! key, plus a timer index from expiry time to instance. Each released event
//! is offered to the instances of its key (NFA semantics: every matching
//! transition fires), completions are emitted to the sink, and the pattern's
//! consumption policy prunes what is left.
//!
//! Event payloads never live here. Instances carry ids and take one
//! [`SharedEventStore`] reference per id they hold; whoever removes an
//! instance from the live set gives those references back.

use crate::event::{EventId, PartitionKey, SharedEvent};
use crate::instance::{AutomatonInstance, InstanceId};
use crate::match_result::Match;
use crate::pattern::{ConsumptionPolicy, PatternGraph, Quantifier};
use crate::sink::MatchSink;
use crate::store::SharedEventStore;
use kairos_core::EventTime;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

type TimerEntries = SmallVec<[(PartitionKey, InstanceId); 4]>;

/// Counters kept by the instance manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub instances_created: u64,
    pub matches_emitted: u64,
    pub evicted: u64,
    pub discarded_by_policy: u64,
    pub discarded_by_cap: u64,
}

/// Drives the live automaton instances of every key.
#[derive(Debug)]
pub struct InstanceManager {
    pattern: Arc<PatternGraph>,
    live: FxHashMap<PartitionKey, Vec<AutomatonInstance>>,
    timers: BTreeMap<EventTime, TimerEntries>,
    next_id: u64,
    max_instances_per_key: Option<usize>,
    stats: ManagerStats,
}

impl InstanceManager {
    pub fn new(pattern: Arc<PatternGraph>) -> Self {
        Self {
            pattern,
            live: FxHashMap::default(),
            timers: BTreeMap::new(),
            next_id: 0,
            max_instances_per_key: None,
            stats: ManagerStats::default(),
        }
    }

    /// Caps the live instances of a single key. Newly produced instances
    /// beyond the cap are discarded.
    pub fn with_max_instances_per_key(mut self, cap: Option<usize>) -> Self {
        self.max_instances_per_key = cap;
        self
    }

    pub fn pattern(&self) -> &Arc<PatternGraph> {
        &self.pattern
    }

    /// Offers one released event to the instances of its key.
    ///
    /// Completions are handed to `sink` before the consumption policy runs.
    /// Returns the number of matches emitted.
    pub fn process_event<S>(
        &mut self,
        event: &SharedEvent,
        store: &mut SharedEventStore,
        sink: &mut S,
    ) -> usize
    where
        S: MatchSink + ?Sized,
    {
        let pattern = Arc::clone(&self.pattern);
        let mut existing = self.live.remove(&event.key).unwrap_or_default();
        let mut produced = Vec::new();
        let mut completed = Vec::new();

        // Advance every live instance; originals stay as they are.
        for instance in &existing {
            let state = pattern.state(instance.state());

            if state.quantifier() == Quantifier::OneOrMore && state.matches(event) {
                let sibling = instance.branch(self.next_instance_id(), state.id(), event);
                acquire(store, &sibling, event);
                produced.push(sibling);
            }

            for &target in state.transitions() {
                let target_state = pattern.state(target);
                if !target_state.matches(event) {
                    continue;
                }
                let successor = instance.branch(self.next_instance_id(), target, event);
                acquire(store, &successor, event);
                if target_state.is_terminal() {
                    completed.push(successor);
                } else {
                    produced.push(successor);
                }
            }
        }

        let start = pattern.start_state();
        if start.matches(event) {
            let instance = AutomatonInstance::start(
                self.next_instance_id(),
                start.id(),
                event,
                pattern.window_millis(),
            );
            store.register(event);
            if start.is_terminal() {
                completed.push(instance);
            } else {
                produced.push(instance);
            }
        }

        let emitted = completed.len();
        if !completed.is_empty() {
            for instance in &completed {
                self.emit(instance, store, sink);
            }

            let discarded = self.apply_policy(&mut existing, &completed, store)
                + self.apply_policy(&mut produced, &completed, store);
            self.stats.discarded_by_policy += discarded as u64;

            for instance in &completed {
                release(store, instance);
            }
        }

        self.enforce_cap(&event.key, existing.len(), &mut produced, store);

        for instance in &produced {
            if let Some(expiry) = instance.expiry() {
                self.timers
                    .entry(expiry)
                    .or_default()
                    .push((event.key.clone(), instance.id()));
            }
        }
        self.stats.instances_created += produced.len() as u64;

        existing.append(&mut produced);
        if !existing.is_empty() {
            self.live.insert(event.key.clone(), existing);
        }

        emitted
    }

    /// Removes every instance whose window closed at or before `watermark`.
    ///
    /// Only call this once the events released up to `watermark` have been
    /// offered, or an instance can be evicted right before the event that
    /// would have completed it. Returns the number of instances evicted.
    pub fn evict_expired(&mut self, watermark: EventTime, store: &mut SharedEventStore) -> usize {
        let due = match watermark.checked_add(1) {
            Some(next) => {
                let later = self.timers.split_off(&next);
                std::mem::replace(&mut self.timers, later)
            }
            None => std::mem::take(&mut self.timers),
        };

        let mut by_key: FxHashMap<PartitionKey, FxHashSet<InstanceId>> = FxHashMap::default();
        for (key, id) in due.into_values().flatten() {
            by_key.entry(key).or_default().insert(id);
        }

        let mut evicted = 0;
        for (key, ids) in by_key {
            // Instances already dropped by the policy leave stale entries behind.
            let Some(instances) = self.live.get_mut(&key) else {
                continue;
            };
            instances.retain(|instance| {
                if !ids.contains(&instance.id()) || !instance.is_expired(watermark) {
                    return true;
                }
                release(store, instance);
                trace!(
                    instance = %instance.id(),
                    key = %key,
                    expiry = ?instance.expiry(),
                    "instance expired"
                );
                evicted += 1;
                false
            });
            if instances.is_empty() {
                self.live.remove(&key);
            }
        }

        if evicted > 0 {
            debug!(count = evicted, watermark, "evicted expired instances");
        }
        self.stats.evicted += evicted as u64;
        evicted
    }

    /// Live instances of `key`, oldest first.
    pub fn live_instances(&self, key: &PartitionKey) -> &[AutomatonInstance] {
        self.live.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &AutomatonInstance> + '_ {
        self.live.values().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.live.values().map(Vec::len).sum()
    }

    /// Number of keys with at least one live instance.
    pub fn key_count(&self) -> usize {
        self.live.len()
    }

    /// Timer entries not yet consumed by eviction, stale ones included.
    pub fn pending_timers(&self) -> usize {
        self.timers.values().map(SmallVec::len).sum()
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    fn next_instance_id(&mut self) -> InstanceId {
        self.next_id += 1;
        InstanceId::new(self.next_id)
    }

    fn emit<S>(&mut self, instance: &AutomatonInstance, store: &SharedEventStore, sink: &mut S)
    where
        S: MatchSink + ?Sized,
    {
        let events: Vec<SharedEvent> = instance
            .matched_ids()
            .into_iter()
            .filter_map(|id| store.get(id))
            .collect();
        let m = Match::new(instance.key().clone(), events);
        debug!(key = %instance.key(), instance = %instance.id(), "match completed: {}", m);
        self.stats.matches_emitted += 1;
        sink.accept(m);
    }

    /// Prunes `instances` according to the pattern's policy. Returns how many
    /// were removed.
    fn apply_policy(
        &self,
        instances: &mut Vec<AutomatonInstance>,
        completed: &[AutomatonInstance],
        store: &mut SharedEventStore,
    ) -> usize {
        let before = instances.len();
        match self.pattern.policy() {
            ConsumptionPolicy::NoSkip => {}
            ConsumptionPolicy::SkipToNext => {
                let Some(earliest) = completed.iter().map(|c| c.start_time()).min() else {
                    return 0;
                };
                instances.retain(|instance| {
                    let keep = instance.start_time() > earliest;
                    if !keep {
                        release(store, instance);
                    }
                    keep
                });
            }
            ConsumptionPolicy::SkipPastLastEvent => {
                let consumed: FxHashSet<EventId> = completed
                    .iter()
                    .flat_map(|c| c.matched().iter_rev())
                    .collect();
                instances.retain(|instance| {
                    let keep = !instance.shares_any(&consumed);
                    if !keep {
                        release(store, instance);
                    }
                    keep
                });
            }
        }
        before - instances.len()
    }

    fn enforce_cap(
        &mut self,
        key: &PartitionKey,
        existing: usize,
        produced: &mut Vec<AutomatonInstance>,
        store: &mut SharedEventStore,
    ) {
        let Some(cap) = self.max_instances_per_key else {
            return;
        };
        let room = cap.saturating_sub(existing);
        if produced.len() <= room {
            return;
        }

        let overflow = produced.split_off(room);
        for instance in &overflow {
            release(store, instance);
        }
        warn!(
            key = %key,
            cap,
            discarded = overflow.len(),
            "instance cap reached, discarding new partial matches"
        );
        self.stats.discarded_by_cap += overflow.len() as u64;
    }
}

/// Takes the references a freshly branched instance owns: the new event
/// plus one per inherited predecessor.
fn acquire(store: &mut SharedEventStore, instance: &AutomatonInstance, event: &SharedEvent) {
    store.register(event);
    for id in instance.matched().iter_rev().skip(1) {
        store.add_reference(id);
    }
}

fn release(store: &mut SharedEventStore, instance: &AutomatonInstance) {
    for id in instance.matched().iter_rev() {
        store.release(id);
    }
}
