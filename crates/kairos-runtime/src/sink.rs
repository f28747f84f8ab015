//! Sink implementations receiving completed matches

use crate::match_result::Match;
use std::io::Write;
use tracing::{error, info};

/// Receiver of completed matches.
///
/// Matches are delivered synchronously from inside the engine's processing
/// pass, in completion order for each key. Sinks cannot fail the pipeline;
/// delivery problems are theirs to log or swallow.
pub trait MatchSink {
    /// Name of this sink
    fn name(&self) -> &str;

    fn accept(&mut self, m: Match);

    /// Flush any buffered output
    fn flush(&mut self) {}
}

impl<S: MatchSink + ?Sized> MatchSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn accept(&mut self, m: Match) {
        (**self).accept(m)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Keeps every match in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    matches: Vec<Match>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Returns the collected matches, leaving the sink empty.
    pub fn take(&mut self) -> Vec<Match> {
        std::mem::take(&mut self.matches)
    }

    pub fn clear(&mut self) {
        self.matches.clear();
    }
}

impl MatchSink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn accept(&mut self, m: Match) {
        self.matches.push(m);
    }
}

/// Forwards each match to a closure.
pub struct CallbackSink<F> {
    name: String,
    callback: F,
}

impl<F: FnMut(Match)> CallbackSink<F> {
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F: FnMut(Match)> MatchSink for CallbackSink<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&mut self, m: Match) {
        (self.callback)(m)
    }
}

/// Logs each match at info level.
#[derive(Debug)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MatchSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&mut self, m: Match) {
        info!(sink = %self.name, key = %m.key(), events = m.len(), "pattern match found: {}", m);
    }
}

/// Writes one JSON object per match to any writer.
pub struct JsonLinesSink<W: Write> {
    name: String,
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
            written: 0,
        }
    }

    /// Number of matches successfully written.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MatchSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&mut self, m: Match) {
        let line = match serde_json::to_string(&m) {
            Ok(line) => line,
            Err(e) => {
                error!("JSON sink {} failed to encode match {}: {}", self.name, m.id(), e);
                return;
            }
        };
        match writeln!(self.writer, "{}", line) {
            Ok(()) => self.written += 1,
            Err(e) => error!("JSON sink {} write error: {}", self.name, e),
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("JSON sink {} flush error: {}", self.name, e);
        }
    }
}

/// Broadcasts every match to several sinks.
pub struct MultiSink {
    name: String,
    sinks: Vec<Box<dyn MatchSink>>,
}

impl MultiSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sinks: Vec::new(),
        }
    }

    pub fn add(mut self, sink: Box<dyn MatchSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MatchSink for MultiSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&mut self, m: Match) {
        // Matches hold their events behind Arcs, so cloning per sink is cheap.
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.accept(m.clone());
            }
            last.accept(m);
        }
    }

    fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }
}
