//! User-facing client hooks.

use async_trait::async_trait;

use halyard_proto::{Payload, Session};

/// Client-side callbacks, invoked from the connection's reader task in
/// receive order.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// The server created a session for this client.
    async fn on_session_created(&self, _session: &Session) {}

    /// The active session was closed.
    async fn on_session_closed(&self) {}

    /// A one-way payload pushed by the server.
    async fn on_signal(&self, _payload: Payload) {}

    /// The connection went away. With autoconnect enabled, reconnection
    /// starts right after this hook returns.
    async fn on_disconnected(&self) {}
}

/// Handler with every hook left at its default.
pub(crate) struct DefaultClientHandler;

#[async_trait]
impl ClientHandler for DefaultClientHandler {}
