//! Correlation of outbound requests to inbound replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use halyard_proto::{Payload, RequestId};

use crate::Error;

/// Pending-request table.
///
/// Each live request holds exactly one entry; the first terminal event
/// (fulfill, fail, timeout removal, disconnect) consumes it, and anything
/// arriving later for the same id is dropped. Ids come from a counter, so
/// they are unique among live requests of this connection.
pub(crate) struct RequestManager {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<Payload, Error>>>>,
    next_id: AtomicU64,
}

impl RequestManager {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh id and park a waiter for it.
    pub(crate) fn register(&self) -> (RequestId, oneshot::Receiver<Result<Payload, Error>>) {
        let ident = RequestId::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(ident, tx);
        (ident, rx)
    }

    /// Deliver a success reply. Returns false when the request already
    /// terminated (the late reply is discarded).
    pub(crate) fn fulfill(&self, ident: RequestId, payload: Payload) -> bool {
        match self.pending.lock().remove(&ident) {
            Some(tx) => tx.send(Ok(payload)).is_ok(),
            None => false,
        }
    }

    /// Deliver a failure. Same late-event semantics as [`fulfill`].
    ///
    /// [`fulfill`]: RequestManager::fulfill
    pub(crate) fn fail(&self, ident: RequestId, error: Error) -> bool {
        match self.pending.lock().remove(&ident) {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Fail every pending request, clearing the table. Used on disconnect
    /// and close so no caller stays parked.
    pub(crate) fn fail_all(&self, error: Error) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Drop the entry without signalling; the caller has already given up
    /// (timeout path).
    pub(crate) fn remove(&self, ident: RequestId) {
        self.pending.lock().remove(&ident);
    }

    #[cfg(test)]
    fn pending_num(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfill_unblocks_the_waiter_once() {
        let manager = RequestManager::new();
        let (ident, rx) = manager.register();

        assert!(manager.fulfill(ident, Payload::text("done")));
        assert_eq!(rx.await.unwrap(), Ok(Payload::text("done")));

        // The entry is consumed; a second terminal event is a no-op.
        assert!(!manager.fulfill(ident, Payload::text("again")));
        assert!(!manager.fail(ident, Error::Internal));
    }

    #[tokio::test]
    async fn reply_after_removal_is_discarded() {
        let manager = RequestManager::new();
        let (ident, _rx) = manager.register();
        manager.remove(ident);
        assert!(!manager.fulfill(ident, Payload::default()));
        assert_eq!(manager.pending_num(), 0);
    }

    #[tokio::test]
    async fn fail_all_drains_every_pending_request() {
        let manager = RequestManager::new();
        let (_, rx1) = manager.register();
        let (_, rx2) = manager.register();

        manager.fail_all(Error::Disconnected);
        assert_eq!(rx1.await.unwrap(), Err(Error::Disconnected));
        assert_eq!(rx2.await.unwrap(), Err(Error::Disconnected));
        assert_eq!(manager.pending_num(), 0);
    }

    #[test]
    fn ids_are_unique_among_live_requests() {
        let manager = RequestManager::new();
        let (a, _rx_a) = manager.register();
        let (b, _rx_b) = manager.register();
        assert_ne!(a, b);
    }
}
