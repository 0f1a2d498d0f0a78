//! Time-ordered event queue.
//!
//! Events are ordered by fire time, then by insertion order, so two events
//! scheduled for the same instant are processed first-in first-out. This is
//! what makes a run reproducible: nothing depends on heap tie-breaking.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Identifier of a scheduled event, unique within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    /// Creates an event ID from a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// An event popped from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<T> {
    /// Unique event identifier (also the insertion sequence).
    pub id: EventId,
    /// Simulated time at which the event fires.
    pub time_ns: u64,
    /// Payload.
    pub kind: T,
}

impl<T: Eq> Ord for Event<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the earliest event.
        other
            .time_ns
            .cmp(&self.time_ns)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl<T: Eq> PartialOrd for Event<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-priority queue of events keyed by `(time, insertion sequence)`.
#[derive(Debug, Clone)]
pub struct EventQueue<T: Eq> {
    heap: BinaryHeap<Event<T>>,
    next_id: u64,
}

impl<T: Eq> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq> EventQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 0,
        }
    }

    /// Schedules `kind` to fire at `time_ns`.
    pub fn schedule(&mut self, time_ns: u64, kind: T) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.heap.push(Event { id, time_ns, kind });
        id
    }

    /// Removes and returns the earliest event.
    pub fn pop(&mut self) -> Option<Event<T>> {
        self.heap.pop()
    }

    /// Returns the earliest event without removing it.
    pub fn peek(&self) -> Option<&Event<T>> {
        self.heap.peek()
    }

    /// Returns the fire time of the earliest event.
    pub fn next_time(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.time_ns)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drops every pending event. IDs keep increasing across clears.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
