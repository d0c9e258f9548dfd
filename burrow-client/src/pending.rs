//! Pending-request table
//!
//! Bookkeeping for in-flight DNS queries awaiting a tunnel response.
//! Each entry owns a single-slot channel: the read loop offers the
//! response without blocking, and a slot that is already filled (or an
//! id with no entry at all) drops the frame silently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use burrow_protocol::Frame;
use tokio::sync::{mpsc, RwLock};

struct PendingEntry {
    /// Single-slot completion sink for the response frame
    slot: mpsc::Sender<Frame>,
    /// When the request was registered
    created_at: Instant,
}

/// Table of in-flight requests keyed by request id
#[derive(Default)]
pub struct PendingTable {
    entries: RwLock<HashMap<u32, PendingEntry>>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`, returning its completion slot
    pub async fn register(&self, request_id: u32) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(1);
        let entry = PendingEntry {
            slot: tx,
            created_at: Instant::now(),
        };

        self.entries.write().await.insert(request_id, entry);
        rx
    }

    /// Offer a response to the waiter for `request_id`
    ///
    /// Non-blocking: a missing entry or an already-filled slot drops the
    /// frame. Returns whether an entry existed.
    pub async fn complete(&self, request_id: u32, frame: Frame) -> bool {
        let entries = self.entries.read().await;
        match entries.get(&request_id) {
            Some(entry) => {
                let _ = entry.slot.try_send(frame);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `request_id`, if any
    pub async fn remove(&self, request_id: u32) {
        self.entries.write().await.remove(&request_id);
    }

    /// Remove entries older than `max_age`, returning how many were reaped
    ///
    /// Safety net behind the waiters' own timeouts: removal only drops
    /// the sender half, which the waiter's timeout path tolerates.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.created_at) <= max_age);
        before - entries.len()
    }

    /// Current number of in-flight requests
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the table is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_complete_deliver() {
        let table = PendingTable::new();
        let mut slot = table.register(7).await;

        assert!(table.complete(7, Frame::dns_response(7, vec![1, 2])).await);

        let frame = slot.recv().await.unwrap();
        assert_eq!(frame.request_id, 7);
        assert_eq!(frame.payload, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_id_dropped() {
        let table = PendingTable::new();
        assert!(!table.complete(99, Frame::dns_response(99, vec![])).await);
    }

    #[tokio::test]
    async fn test_second_offer_dropped() {
        let table = PendingTable::new();
        let mut slot = table.register(3).await;

        assert!(table.complete(3, Frame::dns_response(3, vec![1])).await);
        assert!(table.complete(3, Frame::dns_response(3, vec![2])).await);

        // Only the first offer landed in the slot
        assert_eq!(slot.recv().await.unwrap().payload, vec![1]);
        assert!(slot.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_discards_waiter() {
        let table = PendingTable::new();
        let _slot = table.register(5).await;

        table.remove(5).await;
        assert!(table.is_empty().await);
        assert!(!table.complete(5, Frame::dns_response(5, vec![])).await);
    }

    #[tokio::test]
    async fn test_sweep_reaps_stale_entries() {
        let table = PendingTable::new();
        for id in 1..=4 {
            let _ = table.register(id).await;
        }
        assert_eq!(table.len().await, 4);

        // Nothing is older than 15 seconds yet
        assert_eq!(table.sweep(Duration::from_secs(15)).await, 0);
        assert_eq!(table.len().await, 4);

        // A zero horizon reaps everything
        assert_eq!(table.sweep(Duration::ZERO).await, 4);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_waiter_timeout_then_cleanup_drains_table() {
        let table = PendingTable::new();

        for id in 1..=50u32 {
            let mut slot = table.register(id).await;
            let outcome =
                tokio::time::timeout(Duration::from_millis(1), slot.recv()).await;
            assert!(outcome.is_err());
            table.remove(id).await;
        }

        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_does_not_break_completion_of_fresh_entries() {
        let table = PendingTable::new();
        let mut slot = table.register(1).await;

        table.sweep(Duration::from_secs(15)).await;

        assert!(table.complete(1, Frame::dns_response(1, vec![9])).await);
        assert_eq!(slot.recv().await.unwrap().payload, vec![9]);
    }
}
