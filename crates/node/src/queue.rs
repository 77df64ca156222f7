//! Per-peer FIFO queues shared across dispatch tasks.
//!
//! `PeerQueues` is the common buffer shape behind the mailbox, the control
//! queues feeding running handshakes, and the outbound queues feeding the
//! sender loop. Queues are created lazily on first reference and live for
//! the process lifetime; each push/pop is atomic with respect to
//! concurrent callers, but no multi-step sequence across queues is
//! transactional.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::timeout;

/// A single peer's queue with async wakeup for blocked consumers.
pub struct QueueSlot<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for QueueSlot<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> QueueSlot<T> {
    /// Appends an item; never blocks, never drops.
    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.notify.notify_one();
    }

    /// Removes the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Waits until an item is available, then removes it FIFO.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            // notify_one stores a permit, so a push between try_pop and
            // notified() cannot be lost.
            self.notify.notified().await;
        }
    }

    /// Bounded wait variant of [`pop`](QueueSlot::pop).
    pub async fn pop_timeout(&self, wait: Duration) -> Option<T> {
        timeout(wait, self.pop()).await.ok()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map of peer identifier to its queue, created lazily and never dropped.
pub struct PeerQueues<T> {
    slots: DashMap<String, Arc<QueueSlot<T>>>,
}

impl<T> Default for PeerQueues<T> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<T> PeerQueues<T> {
    /// Creates an empty queue map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the peer's queue, creating it on first reference.
    pub fn slot(&self, peer: &str) -> Arc<QueueSlot<T>> {
        self.slots
            .entry(peer.to_string())
            .or_default()
            .clone()
    }

    /// Appends to the peer's queue.
    pub fn push(&self, peer: &str, item: T) {
        self.slot(peer).push(item);
    }

    /// Non-blocking pop from the peer's queue, if it exists and has items.
    pub fn try_pop(&self, peer: &str) -> Option<T> {
        self.slots.get(peer).and_then(|slot| slot.try_pop())
    }

    /// Identifiers of every peer with a queue, non-empty or not.
    pub fn peers(&self) -> Vec<String> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queues: PeerQueues<u32> = PeerQueues::new();
        queues.push("bob", 1);
        queues.push("bob", 2);
        queues.push("bob", 3);
        assert_eq!(queues.try_pop("bob"), Some(1));
        assert_eq!(queues.try_pop("bob"), Some(2));
        assert_eq!(queues.try_pop("bob"), Some(3));
        assert_eq!(queues.try_pop("bob"), None);
    }

    #[test]
    fn test_queues_are_independent_per_peer() {
        let queues: PeerQueues<&str> = PeerQueues::new();
        queues.push("bob", "for bob");
        queues.push("carol", "for carol");
        assert_eq!(queues.try_pop("carol"), Some("for carol"));
        assert_eq!(queues.try_pop("bob"), Some("for bob"));
    }

    #[test]
    fn test_lazy_creation() {
        let queues: PeerQueues<u32> = PeerQueues::new();
        assert!(queues.peers().is_empty());
        assert_eq!(queues.try_pop("nobody"), None);
        // try_pop on an unknown peer must not create a queue
        assert!(queues.peers().is_empty());
        let _ = queues.slot("bob");
        assert_eq!(queues.peers(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queues: Arc<PeerQueues<u32>> = Arc::new(PeerQueues::new());
        let slot = queues.slot("bob");

        let waiter = tokio::spawn(async move { slot.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queues.push("bob", 42);

        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_pop_returns_queued_item_immediately() {
        let queues: PeerQueues<u32> = PeerQueues::new();
        queues.push("bob", 7);
        assert_eq!(queues.slot("bob").pop().await, 7);
    }

    #[tokio::test]
    async fn test_pop_timeout_expires_on_empty_queue() {
        let queues: PeerQueues<u32> = PeerQueues::new();
        let slot = queues.slot("bob");
        assert_eq!(slot.pop_timeout(Duration::from_millis(30)).await, None);
    }

    #[tokio::test]
    async fn test_push_before_registered_waiter_is_not_lost() {
        let queues: PeerQueues<u32> = PeerQueues::new();
        let slot = queues.slot("bob");
        slot.push(1);
        // The permit stored by push must satisfy a later pop.
        assert_eq!(slot.pop_timeout(Duration::from_millis(100)).await, Some(1));
    }
}
