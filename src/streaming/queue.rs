//! Thread-safe message queues between socket workers and the tick thread
//!
//! Both directions use the same type:
//!
//! | Queue | Producer | Consumer |
//! |-------|----------|----------|
//! | ingress | subscriber worker | dispatcher (tick thread) |
//! | egress | dispatcher (tick thread) | publisher worker |
//!
//! Backed by an unbounded crossbeam channel, so any number of clones may
//! push and pop concurrently. The tick side only uses the non-blocking
//! operations; workers block in [`MessageQueue::pop_timeout`] instead of
//! sleeping between polls.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Unbounded FIFO of raw text messages
#[derive(Clone)]
pub struct MessageQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Append a message. Never blocks.
    #[inline]
    pub fn push(&self, message: String) {
        // Both ends live in `self`, so the channel cannot be disconnected here
        let _ = self.tx.send(message);
    }

    /// Pop the oldest message without blocking
    #[inline]
    pub fn try_pop(&self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pop the oldest message, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of queued messages
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
