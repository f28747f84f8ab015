//! Logical event time and the watermark primitive

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Logical event time in milliseconds.
///
/// Event time is whatever clock the producer stamped on the event; the engine
/// never compares it against the wall clock.
pub type EventTime = i64;

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Monotonic event-time watermark.
///
/// Asserts that no event with an event time at or below the current value is
/// still expected. The value only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    current: EventTime,
}

impl Watermark {
    pub fn new(initial: EventTime) -> Self {
        Self { current: initial }
    }

    /// The lowest watermark for a source tolerating `max_out_of_orderness`:
    /// `i64::MIN + lateness`, saturating.
    pub fn initial(max_out_of_orderness: Duration) -> Self {
        Self::new(EventTime::MIN.saturating_add(duration_millis(max_out_of_orderness)))
    }

    pub fn current(&self) -> EventTime {
        self.current
    }

    /// Moves the watermark to `candidate` if that is strictly later.
    ///
    /// Returns `true` when the watermark moved.
    pub fn advance(&mut self, candidate: EventTime) -> bool {
        if candidate > self.current {
            self.current = candidate;
            true
        } else {
            false
        }
    }

    /// Whether an event stamped `event_time` is covered by this watermark.
    pub fn covers(&self, event_time: EventTime) -> bool {
        event_time <= self.current
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current)
    }
}
