//! Pending-request tables.
//!
//! A table maps an in-flight correlation id to the one-shot waiter that
//! will receive its reply. The runtime keeps two of these: one for hub
//! control requests, one for application-level peer requests. Exactly one
//! waiter may exist per correlation id; entries leave the table on
//! completion, timeout or teardown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{FabricError, Result};

/// Upper bound on concurrently pending requests per table
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;

/// Bounded correlation-id → waiter table
pub struct PendingTable<T> {
    inner: Mutex<HashMap<String, oneshot::Sender<T>>>,
    capacity: usize,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

impl<T> PendingTable<T> {
    /// Create a table holding at most `capacity` in-flight entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<T>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter for a correlation id. Registering the same id
    /// twice is a caller bug and fails the programming contract.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<T>> {
        let mut inner = self.lock();

        if inner.len() >= self.capacity {
            return Err(FabricError::Transport(format!(
                "pending table full: {} requests in flight",
                self.capacity
            )));
        }
        if inner.contains_key(id) {
            return Err(FabricError::Protocol(format!(
                "waiter already registered for correlation id {id}"
            )));
        }

        let (tx, rx) = oneshot::channel();
        inner.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Complete and remove the waiter for `id`. Returns the value back
    /// when no waiter is registered (e.g. it already timed out) so the
    /// caller can route it elsewhere.
    pub fn complete(&self, id: &str, value: T) -> std::result::Result<(), T> {
        match self.lock().remove(id) {
            Some(tx) => tx.send(value),
            None => Err(value),
        }
    }

    /// Drop the waiter for `id`, if any
    pub fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Drop every waiter; their receivers resolve as closed and surface
    /// a transport error at the await site
    pub fn fail_all(&self) {
        self.lock().clear();
    }

    /// Entries currently in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Await a registered waiter with a deadline. A timeout evicts the
    /// entry; a dropped sender surfaces as a transport error.
    pub async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<T>,
        deadline: Duration,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.cancel(id);
                Err(FabricError::Timeout(deadline))
            },
            Ok(Err(_)) => Err(FabricError::Transport(
                "connection closed while awaiting reply".to_string(),
            )),
            Ok(Ok(value)) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_complete_roundtrip() {
        let table: PendingTable<u32> = PendingTable::default();

        let rx = table.register("cid-1").unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.complete("cid-1", 42).is_ok());
        assert_eq!(rx.await.unwrap(), 42);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let table: PendingTable<u32> = PendingTable::default();

        let _rx = table.register("cid-1").unwrap();
        let err = table.register("cid-1").unwrap_err();
        assert!(matches!(err, FabricError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_complete_without_waiter_returns_value() {
        let table: PendingTable<u32> = PendingTable::default();
        assert_eq!(table.complete("ghost", 7), Err(7));
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let table: PendingTable<u32> = PendingTable::new(2);

        let _a = table.register("a").unwrap();
        let _b = table.register("b").unwrap();
        assert!(matches!(
            table.register("c"),
            Err(FabricError::Transport(_))
        ));

        // Cancellation frees a slot
        table.cancel("a");
        assert!(table.register("c").is_ok());
    }

    #[tokio::test]
    async fn test_wait_timeout_evicts_entry() {
        let table: PendingTable<u32> = PendingTable::default();

        let rx = table.register("cid-1").unwrap();
        let err = table
            .wait("cid-1", rx, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, FabricError::Timeout(_)));
        assert!(table.is_empty());

        // The id is free for reuse after eviction
        assert!(table.register("cid-1").is_ok());
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters_with_transport_error() {
        let table: PendingTable<u32> = PendingTable::default();

        let rx1 = table.register("a").unwrap();
        let rx2 = table.register("b").unwrap();
        table.fail_all();

        for rx in [rx1, rx2] {
            let err = table.wait("x", rx, Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, FabricError::Transport(_)));
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_late_completion_after_timeout_is_rejected() {
        let table: PendingTable<u32> = PendingTable::default();

        let rx = table.register("cid-1").unwrap();
        let _ = table.wait("cid-1", rx, Duration::from_millis(10)).await;

        // The reply arrives late; the table hands it back untouched
        assert_eq!(table.complete("cid-1", 99), Err(99));
    }
}
