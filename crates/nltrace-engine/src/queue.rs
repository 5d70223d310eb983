//! Thread-safe event queue
//!
//! Transport tasks append parsed events; a single external consumer drains
//! them in one batch per poll. Draining swaps the buffer for an empty one
//! under the lock and hands the full batch back, so the consumer never holds
//! the lock while processing and enqueuing never blocks on the consumer.

use std::mem;
use std::sync::RwLock;

use nltrace_protocol::TraceEvent;

/// Ordered buffer of pending events, FIFO in arrival order
#[derive(Debug, Default)]
pub struct EventQueue {
    events: RwLock<Vec<TraceEvent>>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Called from transport tasks, possibly concurrently
    /// with a drain.
    pub fn enqueue(&self, event: TraceEvent) {
        let mut events = self.events.write().expect("event queue lock poisoned");
        events.push(event);
    }

    /// Take all pending events, leaving the queue empty.
    ///
    /// Ownership of the batch transfers to the caller; events arrive in the
    /// order their packets were received.
    pub fn drain(&self) -> Vec<TraceEvent> {
        let mut events = self.events.write().expect("event queue lock poisoned");
        mem::take(&mut *events)
    }

    /// Number of events currently waiting
    pub fn len(&self) -> usize {
        self.events.read().expect("event queue lock poisoned").len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
