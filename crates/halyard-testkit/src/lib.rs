//! halyard-testkit: shared scaffolding for integration tests.
//!
//! Provides an in-memory session store, a spawn-and-run server helper, a
//! request-echoing handler, and idempotent tracing setup. Integration tests
//! combine these with per-test handler implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use halyard_proto::{Payload, ReqErr, Session};
use halyard_server::{Connection, Server, ServerHandler, ServerOptions, SessionStore, StoreError};

/// Session store backed by a plain map. Sessions survive disconnects but
/// not the process; exactly what restoration tests need.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn on_session_created(&self, conn: &Arc<Connection>) -> Result<(), StoreError> {
        if let Some(session) = conn.session() {
            self.sessions
                .lock()
                .insert(session.key.clone(), (*session).clone());
        }
        Ok(())
    }

    async fn on_session_lookup(&self, key: &str) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.lock();
        Ok(sessions.get_mut(key).map(|session| {
            session.last_lookup = Utc::now();
            session.clone()
        }))
    }

    async fn on_session_closed(&self, conn: &Arc<Connection>) -> Result<(), StoreError> {
        if let Some(key) = conn.session_key() {
            self.sessions.lock().remove(&key);
        }
        Ok(())
    }
}

/// Replies to every request with its own payload, byte for byte.
pub struct EchoHandler;

#[async_trait]
impl ServerHandler for EchoHandler {
    async fn on_request(
        &self,
        _conn: &Arc<Connection>,
        _name: Option<&str>,
        payload: Payload,
    ) -> Result<Payload, ReqErr> {
        Ok(payload)
    }
}

/// A server running on an ephemeral port, plus the task driving it.
pub struct ServerHandle {
    pub server: Server,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The `ws://` URL clients should dial.
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Graceful shutdown, then reap the accept task.
    pub async fn stop(self) {
        self.server.shutdown().await;
        let _ = self.task.await;
    }
}

/// Bind on `127.0.0.1:0` and run the server on a background task.
pub async fn spawn_server(options: ServerOptions) -> ServerHandle {
    let addr = "127.0.0.1:0".parse().expect("loopback address");
    let server = Server::bind(addr, options)
        .await
        .expect("failed to bind test server");
    let runner = server.clone();
    let task = tokio::spawn(async move {
        let _ = runner.run().await;
    });
    ServerHandle { server, task }
}

/// Install the fmt subscriber once; repeat calls are no-ops so every test
/// can call it first thing.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
