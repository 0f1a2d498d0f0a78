//! Human-readable explanations of simulator transitions.
//!
//! Besides state, explanations are the only thing a simulator emits: a short
//! sentence on every notable transition (eviction, breaker trip, scale-up,
//! failure injected) for a presentation layer to show. Each one is also
//! logged through `tracing` with the simulated timestamp attached.

use std::collections::VecDeque;

use serde::Serialize;

use crate::clock::ns_to_ms;

/// Default number of explanations retained before the oldest is dropped.
pub const DEFAULT_EXPLANATION_CAPACITY: usize = 256;

/// One explanation line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    /// Simulated time the transition happened.
    pub at_ns: u64,
    pub text: String,
}

/// Bounded log of explanations, drained by the consumer.
#[derive(Debug, Clone)]
pub struct ExplanationLog {
    /// Simulator name attached to every tracing event.
    source: &'static str,
    entries: VecDeque<Explanation>,
    capacity: usize,
    /// Total ever recorded, including dropped and drained entries.
    recorded: u64,
}

impl ExplanationLog {
    /// Creates a log with the default capacity.
    pub fn new(source: &'static str) -> Self {
        Self::with_capacity(source, DEFAULT_EXPLANATION_CAPACITY)
    }

    pub fn with_capacity(source: &'static str, capacity: usize) -> Self {
        Self {
            source,
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            recorded: 0,
        }
    }

    /// Records a notable transition (logged at `info`).
    pub fn notable(&mut self, at_ns: u64, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(sim = self.source, sim_ms = ns_to_ms(at_ns), "{text}");
        self.push(at_ns, text);
    }

    /// Records per-request or per-particle detail (logged at `debug`).
    pub fn detail(&mut self, at_ns: u64, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(sim = self.source, sim_ms = ns_to_ms(at_ns), "{text}");
        self.push(at_ns, text);
    }

    fn push(&mut self, at_ns: u64, text: String) {
        self.entries.push_back(Explanation { at_ns, text });
        self.recorded += 1;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Removes and returns every retained explanation, oldest first.
    pub fn drain(&mut self) -> Vec<Explanation> {
        self.entries.drain(..).collect()
    }

    /// The most recent explanation, if any is retained.
    pub fn latest(&self) -> Option<&Explanation> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Explanation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
