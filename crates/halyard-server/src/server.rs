//! Server core: accept loop, dispatch, shutdown gate.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::stream::SplitStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use halyard_proto::{
    codec, Message, MessageKind, Payload, RequestId, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
};

use crate::options::default_session_key;
use crate::store::{FileSessionStore, NullSessionStore};
use crate::{
    Connection, Error, ServerHandler, ServerOptions, SessionInfoParser, SessionKeyGenerator,
    SessionRegistry, SessionStore,
};

type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Tracks handler invocations in flight for the graceful-shutdown drain.
struct OpsGate {
    shutting_down: bool,
    current_ops: u32,
}

pub(crate) struct ServerCore {
    me: Weak<ServerCore>,
    pub(crate) sessions_enabled: bool,
    pub(crate) registry: SessionRegistry,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) key_generator: SessionKeyGenerator,
    info_parser: Option<SessionInfoParser>,
    handler: Arc<dyn ServerHandler>,
    ops: Mutex<OpsGate>,
    drained: Notify,
    stop_accepting: Notify,
    connections: Mutex<Vec<Arc<Connection>>>,
    local_addr: SocketAddr,
}

/// A halyard server.
///
/// Cheap to clone; clones share the same listener and state. Typical use
/// is `bind`, spawn `run`, and eventually `shutdown`.
#[derive(Clone)]
pub struct Server {
    core: Arc<ServerCore>,
    listener: Arc<TcpListener>,
}

impl Server {
    /// Bind the listener and assemble the server.
    ///
    /// When sessions are enabled and no store was configured, the
    /// file-backed store in `<cwd>/wwrsess` is installed.
    pub async fn bind(addr: SocketAddr, options: ServerOptions) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let store: Arc<dyn SessionStore> = match options.session_store {
            Some(store) => store,
            None if options.sessions_enabled => Arc::new(FileSessionStore::in_default_dir()?),
            None => Arc::new(NullSessionStore),
        };
        let key_generator = options
            .session_key_generator
            .unwrap_or_else(|| Arc::new(default_session_key));

        let core = Arc::new_cyclic(|me| ServerCore {
            me: me.clone(),
            sessions_enabled: options.sessions_enabled,
            registry: SessionRegistry::new(options.max_session_connections),
            store,
            key_generator,
            info_parser: options.session_info_parser,
            handler: options.handler,
            ops: Mutex::new(OpsGate {
                shutting_down: false,
                current_ops: 0,
            }),
            drained: Notify::new(),
            stop_accepting: Notify::new(),
            connections: Mutex::new(Vec::new()),
            local_addr,
        });
        Ok(Server {
            core,
            listener: Arc::new(listener),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.core.local_addr
    }

    /// A `ws://` URL reaching this server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.core.local_addr)
    }

    /// Accept connections until [`Server::shutdown`] completes its drain.
    pub async fn run(&self) -> io::Result<()> {
        tracing::info!(addr = %self.core.local_addr, "server listening");
        loop {
            tokio::select! {
                _ = self.core.stop_accepting.notified() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    if self.core.is_shutting_down() {
                        tracing::debug!(peer = %peer_addr, "refusing connection during shutdown");
                        continue;
                    }
                    let core = self.core.clone();
                    tokio::spawn(async move {
                        core.handle_socket(stream, peer_addr).await;
                    });
                }
            }
        }
        tracing::info!(addr = %self.core.local_addr, "server stopped accepting");
        Ok(())
    }

    /// Graceful shutdown: refuse new connections and operations, wait for
    /// every in-flight handler to finish, then stop the accept loop and
    /// close the remaining connections.
    pub async fn shutdown(&self) {
        let busy = {
            let mut gate = self.core.ops.lock();
            gate.shutting_down = true;
            gate.current_ops > 0
        };
        if busy {
            loop {
                let drained = self.core.drained.notified();
                if self.core.ops.lock().current_ops == 0 {
                    break;
                }
                drained.await;
            }
        }
        self.core.stop_accepting.notify_one();

        let connections: Vec<_> = self.core.connections.lock().clone();
        for conn in connections {
            conn.close().await;
        }
        tracing::info!(addr = %self.core.local_addr, "shutdown complete");
    }

    /// Number of sessions with at least one live connection.
    pub fn active_sessions_num(&self) -> usize {
        self.core.registry.active_sessions_num()
    }

    /// Connections bound to the key, or `None` when the key is unknown to
    /// the registry.
    pub fn session_connections_num(&self, key: &str) -> Option<usize> {
        self.core.registry.session_connections_num(key)
    }

    pub fn session_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.core.registry.session_connections(key)
    }

    /// Close the session on every connection currently bound to the key.
    ///
    /// Returns the affected connections and the errors encountered, paired
    /// by index.
    pub async fn close_session(&self, key: &str) -> (Vec<Arc<Connection>>, Vec<Option<Error>>) {
        let connections = self.core.registry.session_connections(key);
        let mut errors = Vec::with_capacity(connections.len());
        for conn in &connections {
            errors.push(conn.close_session().await.err());
        }
        (connections, errors)
    }
}

impl ServerCore {
    fn arc(&self) -> Arc<ServerCore> {
        self.me.upgrade().expect("server core is alive while serving")
    }

    fn is_shutting_down(&self) -> bool {
        self.ops.lock().shutting_down
    }

    /// Reserve a slot in the operation gate. `false` means the server is
    /// draining and the operation must be refused.
    fn try_begin_op(&self) -> bool {
        let mut gate = self.ops.lock();
        if gate.shutting_down {
            return false;
        }
        gate.current_ops += 1;
        true
    }

    fn end_op(&self) {
        let mut gate = self.ops.lock();
        gate.current_ops -= 1;
        if gate.shutting_down && gate.current_ops == 0 {
            self.drained.notify_waiters();
        }
    }

    async fn handle_socket(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let callback = |request: &Request, mut response: Response| {
            if let Some(version) = request.headers().get(PROTOCOL_VERSION_HEADER) {
                if version.as_bytes() != PROTOCOL_VERSION.as_bytes() {
                    tracing::warn!(
                        peer = %peer_addr,
                        client_version = ?version,
                        "refusing client with mismatching protocol version",
                    );
                    let mut refusal = ErrorResponse::new(None);
                    *refusal.status_mut() = StatusCode::BAD_REQUEST;
                    return Err(refusal);
                }
            }
            response.headers_mut().insert(
                PROTOCOL_VERSION_HEADER,
                HeaderValue::from_static(PROTOCOL_VERSION),
            );
            Ok(response)
        };

        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(peer = %peer_addr, error = %e, "handshake failed");
                return;
            }
        };
        if self.is_shutting_down() {
            return;
        }

        let (sink, stream) = ws.split();
        let conn = Connection::new(peer_addr, sink, Arc::downgrade(&self));
        self.connections.lock().push(conn.clone());
        tracing::debug!(peer = %peer_addr, "client connected");
        self.handler.on_client_connected(&conn).await;

        self.read_loop(&conn, stream).await;

        conn.finalize().await;
        self.connections
            .lock()
            .retain(|c| !Arc::ptr_eq(c, &conn));
        tracing::debug!(peer = %peer_addr, "client disconnected");
        self.handler.on_client_disconnected(&conn).await;
    }

    /// One blocking reader per connection. Session operations run inline;
    /// request and signal handlers are dispatched to worker tasks.
    async fn read_loop(&self, conn: &Arc<Connection>, mut stream: WsStream) {
        while let Some(next) = stream.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(peer = %conn.peer_addr(), error = %e, "read failed");
                    break;
                }
            };
            match msg {
                WsMessage::Binary(data) => self.dispatch(conn, &data).await,
                WsMessage::Close(_) => break,
                // The protocol is binary-only; tungstenite answers pings
                // itself.
                _ => {}
            }
        }
    }

    async fn dispatch(&self, conn: &Arc<Connection>, raw: &[u8]) {
        let msg = match Message::parse(raw) {
            Ok(msg) => msg,
            Err(err) => {
                match err.recoverable_ident() {
                    Some(ident) => {
                        tracing::warn!(
                            peer = %conn.peer_addr(),
                            error = %err,
                            "malformed frame; answering with protocol error",
                        );
                        let frame =
                            codec::special_reply(MessageKind::ReplyProtocolError, ident);
                        let _ = conn.send(frame).await;
                    }
                    None => {
                        tracing::debug!(
                            peer = %conn.peer_addr(),
                            error = %err,
                            "dropping malformed frame",
                        );
                    }
                }
                return;
            }
        };

        match msg.kind {
            kind if kind.is_request() => self.handle_request(conn, msg).await,
            kind if kind.is_signal() => self.handle_signal(conn, msg).await,
            MessageKind::RestoreSession => self.handle_session_restore(conn, msg).await,
            MessageKind::CloseSession => self.handle_session_closure(conn, msg).await,
            other => {
                tracing::debug!(peer = %conn.peer_addr(), kind = %other, "dropping unexpected frame");
            }
        }
    }

    async fn handle_request(&self, conn: &Arc<Connection>, msg: Message) {
        let Some(ident) = msg.ident else { return };
        if !self.try_begin_op() {
            let frame = codec::special_reply(MessageKind::ReplyShutdown, ident);
            let _ = conn.send(frame).await;
            return;
        }

        let core = self.arc();
        let conn = conn.clone();
        tokio::spawn(async move {
            let handler = core.handler.clone();
            let name = msg.name;
            let invocation =
                handler.on_request(&conn, name.as_deref(), msg.payload);
            // A panicking handler must still produce a terminal reply,
            // otherwise the caller hangs until its deadline.
            let outcome = AssertUnwindSafe(invocation).catch_unwind().await;

            let frame = match outcome {
                Ok(Ok(payload)) => codec::reply(ident, &payload),
                Ok(Err(req_err)) => codec::error_reply(ident, &req_err),
                Err(_panic) => {
                    tracing::error!(
                        peer = %conn.peer_addr(),
                        request = %ident,
                        "request handler panicked",
                    );
                    Ok(codec::special_reply(MessageKind::ReplyInternalError, ident))
                }
            };
            let frame = frame.unwrap_or_else(|e| {
                tracing::error!(
                    peer = %conn.peer_addr(),
                    request = %ident,
                    error = %e,
                    "reply could not be encoded",
                );
                codec::special_reply(MessageKind::ReplyInternalError, ident)
            });
            if let Err(e) = conn.send(frame).await {
                tracing::debug!(peer = %conn.peer_addr(), error = %e, "reply write failed");
            }
            core.end_op();
        });
    }

    async fn handle_signal(&self, conn: &Arc<Connection>, msg: Message) {
        // Signals arriving during shutdown are dropped without a trace on
        // the wire; there is no reply channel to refuse them on.
        if !self.try_begin_op() {
            return;
        }
        let core = self.arc();
        let conn = conn.clone();
        tokio::spawn(async move {
            let handler = core.handler.clone();
            let name = msg.name;
            let invocation = handler.on_signal(&conn, name.as_deref(), msg.payload);
            if AssertUnwindSafe(invocation).catch_unwind().await.is_err() {
                tracing::error!(peer = %conn.peer_addr(), "signal handler panicked");
            }
            core.end_op();
        });
    }

    /// Restoration by key. Runs inline on the reader task; the store lookup
    /// is the only potentially slow step.
    async fn handle_session_restore(&self, conn: &Arc<Connection>, msg: Message) {
        let Some(ident) = msg.ident else { return };
        if !self.try_begin_op() {
            let frame = codec::special_reply(MessageKind::ReplyShutdown, ident);
            let _ = conn.send(frame).await;
            return;
        }
        self.restore_session(conn, ident, &msg.payload).await;
        self.end_op();
    }

    async fn restore_session(
        &self,
        conn: &Arc<Connection>,
        ident: RequestId,
        payload: &Payload,
    ) {
        if !self.sessions_enabled {
            let frame = codec::special_reply(MessageKind::SessionsDisabled, ident);
            let _ = conn.send(frame).await;
            return;
        }

        let Ok(key) = std::str::from_utf8(&payload.data) else {
            let frame = codec::special_reply(MessageKind::ReplyProtocolError, ident);
            let _ = conn.send(frame).await;
            return;
        };

        let cap = self.registry.max_conns();
        if let Some(num) = self.registry.session_connections_num(key) {
            if cap > 0 && num + 1 > cap {
                let frame = codec::special_reply(MessageKind::MaxSessConnsReached, ident);
                let _ = conn.send(frame).await;
                return;
            }
        }

        let mut session = match self.store.on_session_lookup(key).await {
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "session lookup failed");
                let frame = codec::special_reply(MessageKind::ReplyInternalError, ident);
                let _ = conn.send(frame).await;
                return;
            }
            Ok(None) => {
                let frame = codec::special_reply(MessageKind::SessionNotFound, ident);
                let _ = conn.send(frame).await;
                return;
            }
            Ok(Some(session)) => session,
        };

        // The wire carries the store's raw form; the connection binds the
        // parsed form.
        let encoded = match serde_json::to_vec(&session) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "session encoding failed");
                let frame = codec::special_reply(MessageKind::ReplyInternalError, ident);
                let _ = conn.send(frame).await;
                return;
            }
        };
        if let (Some(parser), Some(info)) = (&self.info_parser, session.info.as_ref()) {
            session.info = Some(parser(info));
        }

        conn.set_session(Some(Arc::new(session)));
        if self.registry.register(conn).is_err() {
            // The capacity pre-check passed; only a concurrent restoration
            // racing this one can take the bucket over the cap.
            panic!("session connection limit exceeded after restoration pre-check");
        }

        let frame = match codec::reply(ident, &Payload::utf8(encoded)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "restore reply encoding failed");
                codec::special_reply(MessageKind::ReplyInternalError, ident)
            }
        };
        let _ = conn.send(frame).await;
    }

    async fn handle_session_closure(&self, conn: &Arc<Connection>, msg: Message) {
        let Some(ident) = msg.ident else { return };
        if !self.try_begin_op() {
            let frame = codec::special_reply(MessageKind::ReplyShutdown, ident);
            let _ = conn.send(frame).await;
            return;
        }

        if !self.sessions_enabled {
            let frame = codec::special_reply(MessageKind::SessionsDisabled, ident);
            let _ = conn.send(frame).await;
            self.end_op();
            return;
        }

        // Closing an absent session is a no-op; the closure is idempotent.
        if let Err(e) = conn.close_session().await {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "session closure notify failed");
        }
        let frame = match codec::reply(ident, &Payload::default()) {
            Ok(frame) => frame,
            Err(_) => codec::special_reply(MessageKind::ReplyInternalError, ident),
        };
        let _ = conn.send(frame).await;
        self.end_op();
    }
}
