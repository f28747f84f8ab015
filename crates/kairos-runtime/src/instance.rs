//! Automaton instances: one partial walk through the pattern for one key
//!
//! Instances are immutable snapshots. Consuming an event never mutates an
//! instance; it produces a new one (copy-on-branch) so a single instance can
//! fan out into several successors without disturbing its siblings.

use crate::event::{EventId, PartitionKey, SharedEvent};
use crate::pattern::StateId;
use kairos_core::EventTime;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

/// Identity of a live instance. Fresh for every produced instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Link {
    id: EventId,
    prev: Option<Arc<Link>>,
}

// Unlinks iteratively so long Kleene chains cannot overflow the stack on drop.
impl Drop for Link {
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(link) = prev {
            match Arc::try_unwrap(link) {
                Ok(mut inner) => prev = inner.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// Persistent, append-only list of matched event ids.
///
/// Appending shares the existing prefix, so branching an instance costs one
/// allocation regardless of how many events it has already matched.
#[derive(Debug, Clone, Default)]
pub struct EventChain {
    head: Option<Arc<Link>>,
    len: usize,
}

impl EventChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new chain with `id` appended. `self` is left untouched.
    pub fn append(&self, id: EventId) -> Self {
        Self {
            head: Some(Arc::new(Link {
                id,
                prev: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last(&self) -> Option<EventId> {
        self.head.as_ref().map(|link| link.id)
    }

    /// Ids from most recent to oldest.
    pub fn iter_rev(&self) -> ChainIter<'_> {
        ChainIter {
            next: self.head.as_deref(),
        }
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.iter_rev().any(|candidate| candidate == id)
    }

    /// Ids in match order, oldest first.
    pub fn to_vec(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.iter_rev().collect();
        ids.reverse();
        ids
    }
}

pub struct ChainIter<'a> {
    next: Option<&'a Link>,
}

impl Iterator for ChainIter<'_> {
    type Item = EventId;

    fn next(&mut self) -> Option<EventId> {
        let link = self.next?;
        self.next = link.prev.as_deref();
        Some(link.id)
    }
}

/// One partial match in progress.
#[derive(Debug, Clone)]
pub struct AutomatonInstance {
    id: InstanceId,
    key: PartitionKey,
    state: StateId,
    matched: EventChain,
    start_time: EventTime,
    expiry: Option<EventTime>,
}

impl AutomatonInstance {
    /// Starts a walk at `state` with `event` as its first match.
    pub(crate) fn start(
        id: InstanceId,
        state: StateId,
        event: &SharedEvent,
        window: Option<i64>,
    ) -> Self {
        let start_time = event.event_time;
        Self {
            id,
            key: event.key.clone(),
            state,
            matched: EventChain::new().append(event.id),
            start_time,
            expiry: window.map(|w| start_time.saturating_add(w)),
        }
    }

    /// Produces a successor in `next` that additionally matched `event`.
    ///
    /// Start and expiry times carry over from `self`.
    pub(crate) fn branch(&self, id: InstanceId, next: StateId, event: &SharedEvent) -> Self {
        Self {
            id,
            key: self.key.clone(),
            state: next,
            matched: self.matched.append(event.id),
            start_time: self.start_time,
            expiry: self.expiry,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn matched(&self) -> &EventChain {
        &self.matched
    }

    pub fn matched_ids(&self) -> Vec<EventId> {
        self.matched.to_vec()
    }

    pub fn start_time(&self) -> EventTime {
        self.start_time
    }

    /// Event time at which the window closes, `None` when unbounded.
    pub fn expiry(&self) -> Option<EventTime> {
        self.expiry
    }

    /// Whether the window has closed at `watermark`.
    pub fn is_expired(&self, watermark: EventTime) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= watermark)
    }

    pub fn shares_any(&self, ids: &FxHashSet<EventId>) -> bool {
        self.matched.iter_rev().any(|id| ids.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::pattern::{PatternGraph, Predicate};

    fn any_state() -> StateId {
        let mut builder = PatternGraph::builder();
        builder.add_state("A", Predicate::Any)
    }

    #[test]
    fn test_chain_append_shares_prefix() {
        let a = EventId::new();
        let b = EventId::new();
        let c = EventId::new();

        let base = EventChain::new().append(a);
        let left = base.append(b);
        let right = base.append(c);

        assert_eq!(base.to_vec(), vec![a]);
        assert_eq!(left.to_vec(), vec![a, b]);
        assert_eq!(right.to_vec(), vec![a, c]);
        assert_eq!(left.len(), 2);
        assert!(left.contains(a));
        assert!(!left.contains(c));
        assert_eq!(right.last(), Some(c));
    }

    #[test]
    fn test_empty_chain() {
        let chain = EventChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.last(), None);
        assert!(chain.to_vec().is_empty());
    }

    #[test]
    fn test_start_and_branch_carry_times() {
        let first = Event::new("u", "A", 1_000).into_shared();
        let second = Event::new("u", "B", 4_000).into_shared();

        let inst = AutomatonInstance::start(
            InstanceId::new(1),
            any_state(),
            &first,
            Some(5_000),
        );
        assert_eq!(inst.start_time(), 1_000);
        assert_eq!(inst.expiry(), Some(6_000));
        assert!(!inst.is_expired(5_999));
        assert!(inst.is_expired(6_000));

        let next = inst.branch(InstanceId::new(2), inst.state(), &second);
        assert_eq!(next.id(), InstanceId::new(2));
        assert_eq!(next.start_time(), 1_000);
        assert_eq!(next.expiry(), Some(6_000));
        assert_eq!(next.matched_ids(), vec![first.id, second.id]);
        assert_eq!(inst.matched_ids(), vec![first.id]);
    }

    #[test]
    fn test_long_chain_drops_without_recursion() {
        let mut chain = EventChain::new();
        for _ in 0..200_000 {
            chain = chain.append(EventId::new());
        }
        assert_eq!(chain.len(), 200_000);
        drop(chain);
    }

    #[test]
    fn test_unbounded_window_never_expires() {
        let first = Event::new("u", "A", 0).into_shared();
        let inst = AutomatonInstance::start(
            InstanceId::new(1),
            any_state(),
            &first,
            None,
        );
        assert!(!inst.is_expired(i64::MAX));
    }
}
