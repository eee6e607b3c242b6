use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

/// Bounded FIFO of inbound bytes.
///
/// Appending past capacity evicts the oldest bytes one for one, so the
/// buffer always holds the most recent `capacity` bytes received.
#[derive(Debug)]
pub struct InboundBuffer {
    bytes: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl InboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Mutex::new(VecDeque::with_capacity(capacity.min(8 * 1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append received bytes; returns how many old bytes were evicted.
    pub fn push(&self, data: &[u8]) -> usize {
        if self.capacity == 0 {
            return data.len();
        }

        let mut bytes = self.lock();
        // Only the tail of an oversized chunk can survive.
        let incoming = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let skipped = data.len() - incoming.len();

        let overflow = (bytes.len() + incoming.len()).saturating_sub(self.capacity);
        bytes.drain(..overflow);
        bytes.extend(incoming);
        overflow + skipped
    }

    /// Drain up to `max` bytes (all when `None`) from the front.
    pub fn drain(&self, max: Option<usize>) -> Bytes {
        let mut bytes = self.lock();
        let take = max.map_or(bytes.len(), |max| max.min(bytes.len()));
        let out: Vec<u8> = bytes.drain(..take).collect();
        Bytes::from(out)
    }

    /// Discard everything buffered; returns the number of bytes dropped.
    pub fn clear(&self) -> usize {
        let mut bytes = self.lock();
        let len = bytes.len();
        bytes.clear();
        len
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        // The deque stays consistent even if a holder panicked.
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
