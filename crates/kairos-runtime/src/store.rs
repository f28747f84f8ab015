//! Reference-counted event store shared by all live automaton instances
//!
//! Instances only carry [`EventId`]s. The payload lives here exactly once and
//! stays until the last instance referencing it goes away. Every
//! (live instance, matched id) pair owns one reference:
//!
//! - an instance that first captures an event calls [`register`](SharedEventStore::register)
//! - a branch inheriting a predecessor's ids calls
//!   [`add_reference`](SharedEventStore::add_reference) once per inherited id
//! - an instance leaving the live set (completion, policy, eviction) calls
//!   [`release`](SharedEventStore::release) once per id it holds

use crate::event::{EventId, SharedEvent};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct StoreEntry {
    event: SharedEvent,
    refs: usize,
}

/// Refcounted map from event identity to payload.
#[derive(Debug, Default)]
pub struct SharedEventStore {
    entries: FxHashMap<EventId, StoreEntry>,
}

impl SharedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one reference on `event`, storing it if this is the first.
    ///
    /// Several branches can capture the same released event in one pass
    /// (fan-out, self-loop plus advance, a fresh start). Each capture is its
    /// own reference, so registering an id that is already stored counts up
    /// instead of resetting.
    pub fn register(&mut self, event: &SharedEvent) {
        self.entries
            .entry(event.id)
            .and_modify(|entry| entry.refs += 1)
            .or_insert_with(|| StoreEntry {
                event: Arc::clone(event),
                refs: 1,
            });
    }

    /// Adds a reference to an already stored event. Unknown ids are ignored.
    ///
    /// Returns whether the id was known.
    pub fn add_reference(&mut self, id: EventId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference, removing the payload when the count reaches zero.
    ///
    /// Releasing an unknown or already removed id is a no-op.
    pub fn release(&mut self, id: EventId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                self.entries.remove(&id);
                trace!(event_id = %id, "event released from store");
            }
        }
    }

    pub fn get(&self, id: EventId) -> Option<SharedEvent> {
        self.entries.get(&id).map(|entry| Arc::clone(&entry.event))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Current reference count, zero for ids not stored.
    pub fn ref_count(&self, id: EventId) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.refs)
    }

    /// Number of distinct events retained.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all reference counts.
    pub fn total_references(&self) -> usize {
        self.entries.values().map(|entry| entry.refs).sum()
    }

    pub fn ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.entries.keys().copied()
    }
}
