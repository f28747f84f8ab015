//! Watermark-driven reordering of out-of-order input
//!
//! Events are buffered per partition key until the watermark passes their
//! event time. The watermark trails the latest event time seen by the
//! configured maximum out-of-orderness, so anything arriving at most that late
//! is still released in event-time order.

use crate::event::{PartitionKey, SharedEvent};
use kairos_core::{duration_millis, EventTime, Watermark};
use rustc_hash::FxHashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::debug;

/// A buffered event, ordered by event time then arrival.
#[derive(Debug)]
struct Pending {
    event_time: EventTime,
    seq: u64,
    event: SharedEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.event_time == other.event_time && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.event_time, self.seq).cmp(&(other.event_time, other.seq))
    }
}

type KeyBuffer = BinaryHeap<Reverse<Pending>>;

/// Buffers events per key and releases them once the watermark covers them.
#[derive(Debug)]
pub struct TemporalOrderer {
    buffers: FxHashMap<PartitionKey, KeyBuffer>,
    watermark: Watermark,
    max_out_of_orderness: i64,
    max_event_time: Option<EventTime>,
    next_seq: u64,
    buffered: usize,
    late_events: u64,
}

impl TemporalOrderer {
    pub fn new(max_out_of_orderness: Duration) -> Self {
        Self {
            buffers: FxHashMap::default(),
            watermark: Watermark::initial(max_out_of_orderness),
            max_out_of_orderness: duration_millis(max_out_of_orderness),
            max_event_time: None,
            next_seq: 0,
            buffered: 0,
            late_events: 0,
        }
    }

    /// Buffers `event` and returns whatever the resulting watermark releases,
    /// sorted by event time (arrival order breaks ties).
    ///
    /// Returns an empty batch when the watermark did not move.
    pub fn ingest(&mut self, event: SharedEvent) -> Vec<SharedEvent> {
        let event_time = event.event_time;
        if self.watermark.covers(event_time) {
            self.late_events += 1;
            debug!(
                event = %event,
                watermark = self.watermark.current(),
                "late event buffered until the next watermark advance"
            );
        }

        self.push(event);
        let max = match self.max_event_time {
            Some(max) if max >= event_time => max,
            _ => {
                self.max_event_time = Some(event_time);
                event_time
            }
        };

        self.advance_to(max.saturating_sub(self.max_out_of_orderness))
    }

    /// Moves the watermark to `candidate` when that is later than the current
    /// one and releases every buffered event it now covers.
    pub fn advance_to(&mut self, candidate: EventTime) -> Vec<SharedEvent> {
        let previous = self.watermark.current();
        if !self.watermark.advance(candidate) {
            return Vec::new();
        }
        debug!(from = previous, to = candidate, "watermark advanced");
        self.release()
    }

    /// Drains the buffers as if no further events will arrive.
    ///
    /// The watermark moves up to the latest event time seen, which covers every
    /// buffered event, including late ones waiting for an advance.
    pub fn flush(&mut self) -> Vec<SharedEvent> {
        if let Some(max) = self.max_event_time {
            self.watermark.advance(max);
        }
        self.release()
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn max_event_time(&self) -> Option<EventTime> {
        self.max_event_time
    }

    pub fn max_out_of_orderness_millis(&self) -> i64 {
        self.max_out_of_orderness
    }

    /// Number of events waiting for the watermark.
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    /// Number of events that arrived at or below the watermark.
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    pub fn buffered_keys(&self) -> usize {
        self.buffers.len()
    }

    fn push(&mut self, event: SharedEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buffered += 1;
        self.buffers
            .entry(event.key.clone())
            .or_default()
            .push(Reverse(Pending {
                event_time: event.event_time,
                seq,
                event,
            }));
    }

    fn release(&mut self) -> Vec<SharedEvent> {
        let watermark = self.watermark;
        let mut released: Vec<Pending> = Vec::new();

        for buffer in self.buffers.values_mut() {
            while let Some(Reverse(head)) = buffer.peek() {
                if !watermark.covers(head.event_time) {
                    break;
                }
                if let Some(Reverse(pending)) = buffer.pop() {
                    released.push(pending);
                }
            }
        }
        self.buffers.retain(|_, buffer| !buffer.is_empty());

        if released.is_empty() {
            return Vec::new();
        }

        released.sort_unstable();
        self.buffered -= released.len();
        debug!(
            count = released.len(),
            watermark = watermark.current(),
            "releasing events"
        );
        released.into_iter().map(|p| p.event).collect()
    }
}
