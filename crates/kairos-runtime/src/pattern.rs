//! Compiled pattern automaton
//!
//! A [`PatternGraph`] is the immutable NFA the instance manager walks. It is
//! built once through [`PatternGraphBuilder`], validated, and then shared
//! read-only (behind an `Arc`) by every partition key and every live instance.
//!
//! - States carry a predicate over a single event and a [`Quantifier`].
//! - A state with no outgoing transitions is accepting.
//! - `OneOrMore` states may consume further matching events in place
//!   (Kleene plus self-loop) in addition to their outgoing transitions.
//! - The optional window bounds how far in event time an instance may run
//!   past the event that started it.

use crate::event::Event;
use kairos_core::{duration_millis, Value};
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// PREDICATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering;
        match self {
            CompareOp::Eq => left.loose_eq(right),
            CompareOp::NotEq => !left.loose_eq(right),
            CompareOp::Lt => left.compare(right) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                left.compare(right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => left.compare(right) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                left.compare(right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Signature of an opaque user predicate.
pub type PredicateFn = dyn Fn(&Event) -> bool + Send + Sync;

/// Boolean condition a state evaluates against a single event.
#[derive(Clone)]
pub enum Predicate {
    /// Matches every event
    Any,
    /// Event type tag equals the given name
    EventType(Arc<str>),
    /// Field comparison: field op value. A missing field never matches.
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Field is present in the payload
    Exists(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Arbitrary closure supplied by the pattern author
    Custom(Arc<PredicateFn>),
}

impl Predicate {
    pub fn event_type(name: &str) -> Self {
        Predicate::EventType(Arc::from(name))
    }

    pub fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn exists(field: &str) -> Self {
        Predicate::Exists(field.to_string())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::EventType(name) => *event.event_type == **name,
            Predicate::Compare { field, op, value } => event
                .get(field)
                .is_some_and(|actual| op.apply(actual, value)),
            Predicate::Exists(field) => event.data.contains_key(field.as_str()),
            Predicate::And(left, right) => left.matches(event) && right.matches(event),
            Predicate::Or(left, right) => left.matches(event) || right.matches(event),
            Predicate::Not(inner) => !inner.matches(event),
            Predicate::Custom(f) => f(event),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Any => write!(f, "Any"),
            Predicate::EventType(name) => write!(f, "EventType({:?})", name),
            Predicate::Compare { field, op, value } => {
                write!(f, "Compare({} {:?} {})", field, op, value)
            }
            Predicate::Exists(field) => write!(f, "Exists({})", field),
            Predicate::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            Predicate::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            Predicate::Not(inner) => write!(f, "Not({:?})", inner),
            Predicate::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

// ============================================================================
// NFA STATE MACHINE
// ============================================================================

/// How many events a state consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantifier {
    /// Consume exactly one event, then move on
    #[default]
    Single,
    /// Consume one event, then optionally keep consuming matching events in place
    OneOrMore,
}

/// What happens to other in-flight instances of a key once one completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumptionPolicy {
    /// Keep every other instance
    NoSkip,
    /// Drop instances that started no later than the earliest completion
    SkipToNext,
    /// Drop instances that share any event with a completion
    #[default]
    SkipPastLastEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// NFA state
#[derive(Debug, Clone)]
pub struct State {
    id: StateId,
    name: String,
    predicate: Predicate,
    quantifier: Quantifier,
    transitions: Vec<StateId>,
}

impl State {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }

    pub fn transitions(&self) -> &[StateId] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.predicate.matches(event)
    }
}

/// Validation failures raised while building a pattern graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern has no states")]
    Empty,

    #[error("transition {from} -> {to} references an unknown state")]
    UnknownTransition { from: StateId, to: StateId },

    #[error("start state {0} is not part of the pattern")]
    UnknownStart(StateId),

    #[error("duplicate state name '{0}'")]
    DuplicateStateName(String),
}

/// Immutable compiled pattern.
#[derive(Debug, Clone)]
pub struct PatternGraph {
    states: Vec<State>,
    start: StateId,
    window: Option<Duration>,
    policy: ConsumptionPolicy,
}

impl PatternGraph {
    pub fn builder() -> PatternGraphBuilder {
        PatternGraphBuilder::new()
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn start_state(&self) -> &State {
        self.state(self.start)
    }

    /// Looks up a state. Ids only come from this graph's builder, so they are
    /// always in range.
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0]
    }

    pub fn state_by_name(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub fn window_millis(&self) -> Option<i64> {
        self.window.map(duration_millis)
    }

    pub fn policy(&self) -> ConsumptionPolicy {
        self.policy
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles and validates a [`PatternGraph`].
///
/// The first state added is the start state unless [`start`](Self::start)
/// says otherwise. Transitions are checked in [`build`](Self::build), so the
/// builder itself never fails midway.
#[derive(Debug, Default)]
pub struct PatternGraphBuilder {
    states: Vec<State>,
    pending: Vec<(StateId, StateId)>,
    start: Option<StateId>,
    window: Option<Duration>,
    policy: ConsumptionPolicy,
}

impl PatternGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, name: impl Into<String>, predicate: Predicate) -> StateId {
        self.add_quantified_state(name, predicate, Quantifier::Single)
    }

    pub fn add_quantified_state(
        &mut self,
        name: impl Into<String>,
        predicate: Predicate,
        quantifier: Quantifier,
    ) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(State {
            id,
            name: name.into(),
            predicate,
            quantifier,
            transitions: Vec::new(),
        });
        id
    }

    pub fn add_transition(&mut self, from: StateId, to: StateId) -> &mut Self {
        self.pending.push((from, to));
        self
    }

    pub fn start(&mut self, state: StateId) -> &mut Self {
        self.start = Some(state);
        self
    }

    pub fn window(&mut self, window: Duration) -> &mut Self {
        self.window = Some(window);
        self
    }

    pub fn policy(&mut self, policy: ConsumptionPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<PatternGraph, PatternError> {
        let PatternGraphBuilder {
            mut states,
            pending,
            start,
            window,
            policy,
        } = self;

        if states.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut names = FxHashSet::default();
        for state in &states {
            if !names.insert(state.name.as_str()) {
                return Err(PatternError::DuplicateStateName(state.name.clone()));
            }
        }

        let start = start.unwrap_or(StateId(0));
        if start.0 >= states.len() {
            return Err(PatternError::UnknownStart(start));
        }

        for (from, to) in pending {
            if from.0 >= states.len() || to.0 >= states.len() {
                return Err(PatternError::UnknownTransition { from, to });
            }
            let transitions = &mut states[from.0].transitions;
            if !transitions.contains(&to) {
                transitions.push(to);
            }
        }

        Ok(PatternGraph {
            states,
            start,
            window,
            policy,
        })
    }
}
