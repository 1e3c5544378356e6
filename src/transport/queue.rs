//! Bounded outbound message queue
//!
//! Each transport session owns one queue. The writer task sends the head
//! entry and pops it only once the write has completed, so a stalled socket
//! keeps counting its in-flight message against the bound.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default maximum number of queued outbound messages per session
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Bounded FIFO of serialized outbound messages
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<Arc<str>>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_OUTBOUND_CAPACITY)),
            capacity,
        }
    }

    /// Append a message
    ///
    /// Fails with [`Error::Backpressure`] when the queue is already full;
    /// the message is not enqueued.
    pub fn push(&mut self, message: Arc<str>) -> Result<()> {
        if self.is_full() {
            return Err(Error::Backpressure {
                capacity: self.capacity,
            });
        }
        self.entries.push_back(message);
        Ok(())
    }

    /// Message currently being (or about to be) written
    pub fn front(&self) -> Option<&Arc<str>> {
        self.entries.front()
    }

    /// Remove the head entry after its write completed
    pub fn pop_front(&mut self) -> Option<Arc<str>> {
        self.entries.pop_front()
    }

    /// Drop every queued message
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}
