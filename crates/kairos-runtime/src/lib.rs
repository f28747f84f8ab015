//! Kairos Runtime - out-of-order complex event processing
//!
//! Detects event sequences described by a compiled [`PatternGraph`] in
//! streams that arrive out of order. Events are buffered per key until the
//! watermark makes them safe, then driven through per-key NFA instances
//! whose matched events live once in a refcounted [`SharedEventStore`].
//!
//! ```rust
//! use kairos_runtime::{Engine, Event, PatternGraph, Predicate};
//! use std::time::Duration;
//!
//! let mut builder = PatternGraph::builder();
//! let login = builder.add_state("login", Predicate::event_type("LOGIN"));
//! let purchase = builder.add_state("purchase", Predicate::event_type("PURCHASE"));
//! builder.add_transition(login, purchase).window(Duration::from_secs(10));
//! let pattern = builder.build().unwrap();
//!
//! let mut engine = Engine::collecting(pattern, Duration::from_secs(5));
//! engine.ingest(Event::new("user-1", "LOGIN", 10_000));
//! engine.ingest(Event::new("user-1", "PURCHASE", 15_000));
//! engine.flush();
//!
//! assert_eq!(engine.sink().len(), 1);
//! ```

pub mod config;
pub mod engine;
pub mod event;
pub mod instance;
pub mod logging;
pub mod manager;
pub mod match_result;
pub mod orderer;
pub mod pattern;
pub mod sink;
pub mod store;

pub use config::{ConfigError, EngineConfig, LogFormat, LoggingConfig};
pub use engine::{Engine, EngineStats};
pub use event::{Event, EventId, PartitionKey, SharedEvent};
pub use instance::{AutomatonInstance, EventChain, InstanceId};
pub use manager::{InstanceManager, ManagerStats};
pub use match_result::{Match, MatchId};
pub use orderer::TemporalOrderer;
pub use pattern::{
    CompareOp, ConsumptionPolicy, PatternError, PatternGraph, PatternGraphBuilder, Predicate,
    Quantifier, State, StateId,
};
pub use sink::{CallbackSink, CollectingSink, JsonLinesSink, LogSink, MatchSink, MultiSink};
pub use store::SharedEventStore;

pub use kairos_core::{EventTime, Value, Watermark};
