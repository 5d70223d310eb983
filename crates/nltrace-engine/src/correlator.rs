//! Request/response correlation
//!
//! Symbol queries look synchronous to the caller but travel over the same
//! asynchronous transport as event traffic, with responses arriving out of
//! band. The correlator assigns each query a monotonically increasing
//! identifier, parks the caller on a oneshot channel, and resolves it when
//! the transport sees a response packet carrying that identifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::EngineError;

/// A caller's handle to one outstanding request
#[derive(Debug)]
pub struct PendingResponse {
    /// Identifier to embed in the outgoing request packet
    pub id: u64,
    rx: oneshot::Receiver<Bytes>,
}

/// Table of outstanding requests awaiting out-of-band responses
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: RwLock<HashMap<u64, oneshot::Sender<Bytes>>>,
}

impl RequestCorrelator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request and return the handle to await its response.
    ///
    /// Identifiers start at 1 and are never reused; at most one pending
    /// entry exists per identifier.
    pub fn issue(&self) -> PendingResponse {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.write().expect("request table lock poisoned");
        pending.insert(id, tx);

        PendingResponse { id, rx }
    }

    /// Resolve the request with the given identifier, waking its caller.
    ///
    /// A response for an identifier that was never issued, already
    /// completed, or already timed out is a protocol error and is reported
    /// to the transport, never swallowed.
    pub fn complete(&self, id: u64, response: Bytes) -> Result<(), EngineError> {
        let tx = {
            let mut pending = self.pending.write().expect("request table lock poisoned");
            pending.remove(&id).ok_or(EngineError::UnknownRequest(id))?
        };

        if tx.send(response).is_err() {
            // Caller dropped its future between issue and complete
            tracing::debug!(request_id = id, "Response arrived for abandoned request");
        }
        Ok(())
    }

    /// Drop the pending entry for `id`, if any. Called after a timeout so a
    /// late response is reported as unknown instead of leaking the entry.
    pub fn abandon(&self, id: u64) {
        let mut pending = self.pending.write().expect("request table lock poisoned");
        pending.remove(&id);
    }

    /// Fail every outstanding request. Called when the connection drops;
    /// waiting callers observe a connection-lost error.
    pub fn fail_all(&self) -> usize {
        let mut pending = self.pending.write().expect("request table lock poisoned");
        let count = pending.len();
        // Dropping the senders wakes the receivers with an error
        pending.clear();
        count
    }

    /// Number of requests currently awaiting responses
    pub fn outstanding(&self) -> usize {
        self.pending
            .read()
            .expect("request table lock poisoned")
            .len()
    }

    /// Suspend until the response for `pending` arrives, the optional
    /// `timeout` elapses, or the connection drops.
    pub async fn await_response(
        &self,
        pending: PendingResponse,
        timeout: Option<Duration>,
    ) -> Result<Bytes, EngineError> {
        let PendingResponse { id, rx } = pending;

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(EngineError::ConnectionLost(id)),
                Err(_) => {
                    self.abandon(id);
                    Err(EngineError::RequestTimeout { id, timeout: limit })
                }
            },
            None => rx.await.map_err(|_| EngineError::ConnectionLost(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_assigns_unique_ids() {
        let correlator = RequestCorrelator::new();
        let a = correlator.issue();
        let b = correlator.issue();
        let c = correlator.issue();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 3);
        assert_eq!(correlator.outstanding(), 3);
    }

    #[tokio::test]
    async fn test_complete_unblocks_waiter() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.issue();
        let id = pending.id;

        correlator
            .complete(id, Bytes::from_static(b"response"))
            .unwrap();

        let response = correlator.await_response(pending, None).await.unwrap();
        assert_eq!(response.as_ref(), b"response");
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_error() {
        let correlator = RequestCorrelator::new();
        assert!(matches!(
            correlator.complete(99, Bytes::new()),
            Err(EngineError::UnknownRequest(99))
        ));
    }

    #[tokio::test]
    async fn test_complete_twice_is_error() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.issue();
        let id = pending.id;

        correlator.complete(id, Bytes::new()).unwrap();
        assert!(matches!(
            correlator.complete(id, Bytes::new()),
            Err(EngineError::UnknownRequest(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.issue();
        let id = pending.id;

        let result = correlator
            .await_response(pending, Some(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(EngineError::RequestTimeout { .. })));
        assert_eq!(correlator.outstanding(), 0);

        // A late response must now be reported as unknown
        assert!(matches!(
            correlator.complete(id, Bytes::new()),
            Err(EngineError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters() {
        let correlator = RequestCorrelator::new();
        let pending = correlator.issue();
        let id = pending.id;

        assert_eq!(correlator.fail_all(), 1);

        let result = correlator.await_response(pending, None).await;
        assert!(matches!(result, Err(EngineError::ConnectionLost(i)) if i == id));
    }
}
