//! Bounded FIFO of frames awaiting transmission.

use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::frame::MacHeader;
use crate::sim::Instant;

/// One queued send request: the payload, its prepared DATA header, and the
/// time it entered the queue.
#[derive(Clone)]
pub struct QueueItem {
    pub payload: Arc<[u8]>,
    pub header: MacHeader,
    pub enqueued_at: Instant,
}

/// FIFO transmit queue with a hard capacity; arrivals beyond it are
/// dropped, which is the only overflow signal best-effort service gives.
pub struct MacQueue {
    items: VecDeque<QueueItem>,
    capacity: usize,
}

impl MacQueue {
    pub fn new(capacity: usize) -> Self {
        MacQueue {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append a frame. Returns false (after logging) when the queue is full.
    pub fn enqueue(&mut self, payload: Arc<[u8]>, header: MacHeader, now: Instant) -> bool {
        if self.items.len() >= self.capacity {
            warn!("transmit queue full ({} items), dropping arrival", self.capacity);
            return false;
        }
        self.items.push_back(QueueItem {
            payload,
            header,
            enqueued_at: now,
        });
        true
    }

    pub fn dequeue(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Remove the entry holding exactly this payload allocation. Linear.
    pub fn remove(&mut self, payload: &Arc<[u8]>) -> bool {
        if let Some(pos) = self.items.iter().position(|i| Arc::ptr_eq(&i.payload, payload)) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn flush(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameType, MacHeader};

    fn payload(byte: u8) -> Arc<[u8]> {
        vec![byte; 4].into()
    }

    fn header() -> MacHeader {
        MacHeader::new(FrameType::Data)
    }

    #[test]
    fn fifo_order_and_bound() {
        let mut q = MacQueue::new(3);
        for i in 0..5 {
            q.enqueue(payload(i), header(), Instant::from_micros(i as u64));
        }
        // Arrivals beyond capacity were dropped silently.
        assert_eq!(q.len(), 3);
        let order: Vec<u8> = std::iter::from_fn(|| q.dequeue().map(|i| i.payload[0])).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn remove_matches_by_allocation_not_contents() {
        let mut q = MacQueue::new(8);
        let a = payload(1);
        let twin = payload(1);
        q.enqueue(a.clone(), header(), Instant::ZERO);
        // Same bytes, different allocation: not removed.
        assert!(!q.remove(&twin));
        assert!(q.remove(&a));
        assert!(q.is_empty());
    }

    #[test]
    fn peek_leaves_item_in_place() {
        let mut q = MacQueue::new(2);
        q.enqueue(payload(7), header(), Instant::ZERO);
        assert_eq!(q.peek().unwrap().payload[0], 7);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn flush_empties() {
        let mut q = MacQueue::new(4);
        q.enqueue(payload(1), header(), Instant::ZERO);
        q.enqueue(payload(2), header(), Instant::ZERO);
        q.flush();
        assert!(q.is_empty());
        assert!(q.dequeue().is_none());
    }
}
