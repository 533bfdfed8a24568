use std::collections::VecDeque;

use tracing::warn;

use crate::domain::Message;

/// Bounded FIFO of messages held back while cache mode is on.
///
/// When full, the oldest message is evicted and counted as dropped.
#[derive(Debug)]
pub struct CacheBuffer {
    items: VecDeque<Message>,
    capacity: usize,
    dropped: u64,
}

impl CacheBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn enqueue(&mut self, message: Message) {
        if self.items.len() >= self.capacity {
            if let Some(evicted) = self.items.pop_front() {
                self.dropped += 1;
                warn!(
                    message_id = %evicted.id,
                    capacity = self.capacity,
                    dropped = self.dropped,
                    "cache full; dropping oldest message"
                );
            }
        }
        self.items.push_back(message);
    }

    /// Take every cached message, oldest first.
    pub fn drain_in_order(&mut self) -> Vec<Message> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
