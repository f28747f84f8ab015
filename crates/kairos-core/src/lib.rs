//! # Kairos Core
//!
//! Foundational types shared across the Kairos complex event processing engine.
//!
//! - [`value`]: payload values with loose numeric comparison
//! - [`time`]: logical event time and the monotonic [`Watermark`]
//!
//! ## Quick Start
//!
//! ```rust
//! use kairos_core::{Value, Watermark};
//!
//! let price = Value::Float(19.5);
//! assert!(price.loose_eq(&Value::Float(19.5)));
//!
//! let mut wm = Watermark::new(1_000);
//! assert!(wm.advance(2_000));
//! assert!(!wm.advance(1_500));
//! ```

pub mod time;
pub mod value;

pub use time::{duration_millis, EventTime, Watermark};
pub use value::Value;
