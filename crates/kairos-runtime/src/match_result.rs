//! Completed pattern matches

use crate::event::{PartitionKey, SharedEvent};
use chrono::{DateTime, Utc};
use kairos_core::EventTime;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MatchId(Uuid);

impl MatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A completed match: the events an instance consumed, in traversal order.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    id: MatchId,
    key: PartitionKey,
    events: Vec<SharedEvent>,
    processing_time: DateTime<Utc>,
}

impl Match {
    pub fn new(key: PartitionKey, events: Vec<SharedEvent>) -> Self {
        Self {
            id: MatchId::new(),
            key,
            events,
            processing_time: Utc::now(),
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn events(&self) -> &[SharedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Wall-clock time the match was materialized.
    pub fn processing_time(&self) -> DateTime<Utc> {
        self.processing_time
    }

    pub fn start_time(&self) -> Option<EventTime> {
        self.events.first().map(|e| e.event_time)
    }

    pub fn end_time(&self) -> Option<EventTime> {
        self.events.last().map(|e| e.event_time)
    }

    pub fn event_types(&self) -> Vec<&str> {
        self.events.iter().map(|e| &*e.event_type).collect()
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Match {} [key={}]: ", self.id, self.key)?;
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}@{}", event.event_type, event.event_time)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn test_match_accessors() {
        let login = Event::new("u1", "LOGIN", 10_000).into_shared();
        let purchase = Event::new("u1", "PURCHASE", 15_000).into_shared();
        let m = Match::new(login.key.clone(), vec![login, purchase]);

        assert_eq!(m.len(), 2);
        assert_eq!(m.event_types(), vec!["LOGIN", "PURCHASE"]);
        assert_eq!(m.start_time(), Some(10_000));
        assert_eq!(m.end_time(), Some(15_000));
        assert!(m.to_string().ends_with("LOGIN@10000 -> PURCHASE@15000"));
    }

    #[test]
    fn test_match_ids_are_unique() {
        let a = Match::new(PartitionKey::from("k"), Vec::new());
        let b = Match::new(PartitionKey::from("k"), Vec::new());
        assert_ne!(a.id(), b.id());
        assert!(a.is_empty());
    }

    #[test]
    fn test_match_serializes_events_inline() {
        let e = Event::new("u1", "LOGIN", 1).into_shared();
        let m = Match::new(e.key.clone(), vec![e]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["key"], "u1");
        assert_eq!(json["events"][0]["event_type"], "LOGIN");
        assert!(json["processing_time"].is_string());
    }
}
