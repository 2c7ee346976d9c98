//! In-memory index of live connections per session key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Connection, Error};

/// Maps session keys to the connections currently bound to them.
///
/// Invariant: every connection with a bound session appears in exactly the
/// bucket keyed by its session key, and in no other bucket. Buckets are
/// pruned when their last connection deregisters, so an empty bucket is
/// never observable.
///
/// The registry holds strong references; connections deregister themselves
/// on close, which is what breaks the connection ↔ registry cycle.
pub struct SessionRegistry {
    max_conns: usize,
    buckets: Mutex<HashMap<String, Vec<Arc<Connection>>>>,
}

impl SessionRegistry {
    /// `max_conns` of 0 means unlimited connections per session.
    pub fn new(max_conns: usize) -> Self {
        Self {
            max_conns,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_conns(&self) -> usize {
        self.max_conns
    }

    /// Insert a connection into the bucket of its bound session.
    ///
    /// The caller must have bound a session to the connection first.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<(), Error> {
        let key = conn
            .session_key()
            .expect("registering a connection without a bound session");
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        if self.max_conns > 0 && bucket.len() >= self.max_conns {
            return Err(Error::MaxSessConnsReached);
        }
        if !bucket.iter().any(|c| Arc::ptr_eq(c, conn)) {
            bucket.push(conn.clone());
        }
        Ok(())
    }

    /// Remove a connection from its session's bucket, pruning the bucket
    /// when it becomes empty.
    pub fn deregister(&self, conn: &Arc<Connection>) {
        let Some(key) = conn.session_key() else {
            return;
        };
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.retain(|c| !Arc::ptr_eq(c, conn));
            if bucket.is_empty() {
                buckets.remove(&key);
            }
        }
    }

    /// Number of connections bound to the key, or `None` when the key has
    /// no bucket at all.
    pub fn session_connections_num(&self, key: &str) -> Option<usize> {
        self.buckets.lock().get(key).map(Vec::len)
    }

    /// Snapshot of the connections bound to the key.
    pub fn session_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.buckets.lock().get(key).cloned().unwrap_or_default()
    }

    /// Number of sessions with at least one live connection.
    pub fn active_sessions_num(&self) -> usize {
        self.buckets.lock().len()
    }
}
