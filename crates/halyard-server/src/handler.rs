//! User-facing server hooks.

use std::sync::Arc;

use async_trait::async_trait;

use halyard_proto::{Payload, ReqErr};

use crate::Connection;

/// The server's user hooks.
///
/// Request and signal handlers run on spawned worker tasks, so a slow
/// handler never stalls the connection's reader; a panicking request
/// handler is answered with an internal-error reply. The connection hooks
/// run inline on the connection's reader task.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    /// A client completed the handshake.
    async fn on_client_connected(&self, _conn: &Arc<Connection>) {}

    /// A client's transport went away, for whatever reason.
    async fn on_client_disconnected(&self, _conn: &Arc<Connection>) {}

    /// A one-way payload from the client; nothing is sent back.
    async fn on_signal(&self, _conn: &Arc<Connection>, _name: Option<&str>, _payload: Payload) {}

    /// A request from the client. `Ok` payloads become success replies,
    /// `Err` values travel to the client as typed error replies.
    async fn on_request(
        &self,
        _conn: &Arc<Connection>,
        _name: Option<&str>,
        _payload: Payload,
    ) -> Result<Payload, ReqErr> {
        Err(ReqErr::new(
            "not_implemented",
            "this server does not handle requests",
        ))
    }
}

/// Handler with every hook left at its default.
pub(crate) struct DefaultHandler;

#[async_trait]
impl ServerHandler for DefaultHandler {}
