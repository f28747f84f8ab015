//! Event types for the runtime

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kairos_core::{EventTime, Value};
use rustc_hash::FxBuildHasher;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Type alias for IndexMap with FxBuildHasher for faster hashing of event fields.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// A shared reference to an Event.
///
/// Released events flow through the instance manager and the shared store as
/// `Arc`s, so every partial match referencing an event shares one payload.
pub type SharedEvent = Arc<Event>;

/// Unique identity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque partition key. Events sharing a key are matched together.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(Arc<[u8]>);

impl PartitionKey {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Vec<u8>> for PartitionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for PartitionKey {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionKey({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(&self.0),
        }
    }
}

/// A runtime event.
///
/// Events are immutable once built and compare by identity only: two events
/// with identical payloads but different ids are different events.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: EventId,
    pub key: PartitionKey,
    /// Event type name (Arc<str> for O(1) clone instead of O(n) String clone)
    pub event_type: Arc<str>,
    /// Logical event time used for ordering, windows and watermarks
    pub event_time: EventTime,
    /// Wall-clock time the event was constructed. Informational only.
    pub ingestion_time: DateTime<Utc>,
    pub data: FxIndexMap<String, Value>,
}

impl Event {
    pub fn new(
        key: impl Into<PartitionKey>,
        event_type: impl Into<Arc<str>>,
        event_time: EventTime,
    ) -> Self {
        Self {
            id: EventId::new(),
            key: key.into(),
            event_type: event_type.into(),
            event_time,
            ingestion_time: Utc::now(),
            data: IndexMap::with_hasher(FxBuildHasher),
        }
    }

    /// Creates a new event from a pre-built fields map.
    pub fn from_fields(
        key: impl Into<PartitionKey>,
        event_type: impl Into<Arc<str>>,
        event_time: EventTime,
        data: FxIndexMap<String, Value>,
    ) -> Self {
        Self {
            data,
            ..Self::new(key, event_type, event_time)
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_float())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_int())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [key={}, id={}]",
            self.event_type, self.event_time, self.key, self.id
        )
    }
}
