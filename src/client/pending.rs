//! Correlation table for requests awaiting a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};
use crate::protocol::{ResponseFrame, HANDSHAKE_REQUEST_ID};

/// Completion slot handed to the caller.
pub(crate) type ResponseWaiter = oneshot::Receiver<Result<ResponseFrame>>;

/// Pending requests keyed by correlation id.
///
/// The lock is only held to insert, remove or drain; never across an await.
/// Once [`fail_all`](Self::fail_all) has run the table refuses registrations.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    waiters: HashMap<String, oneshot::Sender<Result<ResponseFrame>>>,
    closed: bool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and register a waiter for it.
    pub fn register(&self) -> Result<(String, ResponseWaiter)> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(GatewayError::NotConnected);
        }
        let id = loop {
            let candidate = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            if candidate != HANDSHAKE_REQUEST_ID && !inner.waiters.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id.clone(), tx);
        tracing::debug!(%id, pending_len = inner.waiters.len(), "registered pending waiter");
        Ok((id, rx))
    }

    /// Hand a response to its waiter.
    ///
    /// Returns `false` when no request with that id is outstanding.
    pub fn complete(&self, response: ResponseFrame) -> bool {
        let waiter = self.inner.lock().waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                let id = response.id.clone();
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!(%id, "waiter gone before response was delivered");
                }
                true
            }
            None => false,
        }
    }

    /// Forget a waiter without completing it.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.inner.lock().waiters.remove(id).is_some();
        if removed {
            tracing::debug!(%id, "pending request cancelled");
        }
        removed
    }

    /// Fail every waiter with `ConnectionClosed` and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.waiters.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(GatewayError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    /// Ids of outstanding requests, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().waiters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

/// Removes a waiter when the request future ends, however it ends.
pub(crate) struct PendingGuard<'a> {
    pub table: &'a PendingTable,
    pub id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        // No-op when the response already removed the entry.
        self.table.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = PendingTable::new();
        let (id, rx) = table.register().unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.complete(ResponseFrame::success(id.clone(), json!({"n": 1}))));
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.id, id);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_waiter_wakes_on_complete() {
        let table = PendingTable::new();
        let (id, rx) = table.register().unwrap();
        let mut waiter = tokio_test::task::spawn(rx);
        tokio_test::assert_pending!(waiter.poll());

        table.complete(ResponseFrame::success(id, json!("done")));
        assert!(waiter.is_woken());
        let response = tokio_test::assert_ready_ok!(waiter.poll()).unwrap();
        assert_eq!(response.payload, Some(json!("done")));
    }

    #[test]
    fn test_ids_are_unique_and_never_reserved() {
        let table = PendingTable::new();
        let ids: Vec<String> = (0..50).map(|_| table.register().unwrap().0).collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert!(!ids.iter().any(|id| id == HANDSHAKE_REQUEST_ID));
    }

    #[test]
    fn test_unknown_id_is_not_delivered() {
        let table = PendingTable::new();
        let (_id, _rx) = table.register().unwrap();
        assert!(!table.complete(ResponseFrame::success("nope", json!(null))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_closes_table() {
        let table = PendingTable::new();
        let (_a, rx_a) = table.register().unwrap();
        let (_b, rx_b) = table.register().unwrap();

        assert_eq!(table.fail_all("peer went away"), 2);
        for rx in [rx_a, rx_b] {
            let err = rx.await.unwrap().unwrap_err();
            assert!(matches!(err, GatewayError::ConnectionClosed(ref r) if r == "peer went away"));
        }
        assert!(matches!(table.register(), Err(GatewayError::NotConnected)));
    }

    #[test]
    fn test_guard_removes_entry() {
        let table = PendingTable::new();
        let (id, _rx) = table.register().unwrap();
        {
            let _guard = PendingGuard {
                table: &table,
                id: &id,
            };
        }
        assert!(table.ids().is_empty());
        assert!(!table.complete(ResponseFrame::success(id, json!(1))));
    }
}
