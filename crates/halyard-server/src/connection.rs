//! Per-peer connection state machine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use halyard_proto::{codec, Payload, Session, SessionInfo};

use crate::server::ServerCore;
use crate::Error;

pub(crate) type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// One connected peer.
///
/// The connection owns the write half of the socket behind an async mutex
/// held for exactly one frame write; the read half is driven by the
/// server's reader task. At most one session is bound at a time.
///
/// Lifecycle: Open → Closing (remote close, read error, server drain, or
/// [`Connection::close`]) → Closed (writer drained, session deregistered).
pub struct Connection {
    me: Weak<Connection>,
    core: Weak<ServerCore>,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<WsSink>,
    session: Mutex<Option<Arc<Session>>>,
    state: AtomicU8,
}

impl Connection {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        sink: WsSink,
        core: Weak<ServerCore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            core,
            peer_addr,
            writer: tokio::sync::Mutex::new(sink),
            session: Mutex::new(None),
            state: AtomicU8::new(STATE_OPEN),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The currently bound session, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    pub fn session_key(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.key.clone())
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    fn arc(&self) -> Result<Arc<Connection>, Error> {
        self.me.upgrade().ok_or(Error::Closed)
    }

    fn server(&self) -> Result<Arc<ServerCore>, Error> {
        self.core.upgrade().ok_or(Error::Closed)
    }

    /// Write one frame, serialized against every other writer of this
    /// connection. The mutex is held across exactly one frame write so
    /// concurrent replies and session notifications never interleave.
    pub(crate) async fn send(&self, frame: Bytes) -> Result<(), Error> {
        if self.state.load(Ordering::Acquire) == STATE_CLOSED {
            return Err(Error::Closed);
        }
        let mut sink = self.writer.lock().await;
        sink.send(WsMessage::Binary(frame.to_vec()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Push a one-way signal to this client.
    pub async fn signal(&self, name: Option<&str>, payload: &Payload) -> Result<(), Error> {
        let frame = codec::signal(name, payload)?;
        self.send(frame).await
    }

    /// Create a session and bind it to this connection.
    ///
    /// The session is bound and registered before anything else happens;
    /// the client is then notified, and only then is the store's creation
    /// hook invoked, so the client's mirror is never behind the store. A
    /// store failure is logged and deliberately does not tear the session
    /// down; the only consequence is that later restoration will fail.
    pub async fn create_session(&self, info: Option<SessionInfo>) -> Result<Arc<Session>, Error> {
        let core = self.server()?;
        let me = self.arc()?;
        if !core.sessions_enabled {
            return Err(Error::SessionsDisabled);
        }

        let key = (core.key_generator)();
        let session = Arc::new(Session::new(key, info));
        {
            let mut slot = self.session.lock();
            if slot.is_some() {
                return Err(Error::SessionActive);
            }
            *slot = Some(session.clone());
        }
        if let Err(e) = core.registry.register(&me) {
            *self.session.lock() = None;
            return Err(e);
        }

        let frame = match codec::session_created(&session) {
            Ok(frame) => frame,
            Err(e) => {
                core.registry.deregister(&me);
                *self.session.lock() = None;
                return Err(e.into());
            }
        };
        if let Err(e) = self.send(frame).await {
            tracing::warn!(
                peer = %self.peer_addr,
                error = %e,
                "failed to notify client of created session",
            );
        }

        if let Err(e) = core.store.on_session_created(&me).await {
            tracing::error!(
                session_key = %session.key,
                error = %e,
                "session store rejected created session; it will not be restorable",
            );
        }
        Ok(session)
    }

    /// Close the bound session, if any: deregister, let the store discard
    /// it, unbind, and notify the client.
    pub async fn close_session(&self) -> Result<(), Error> {
        let core = self.server()?;
        let me = self.arc()?;
        if !self.has_session() {
            return Ok(());
        }

        core.registry.deregister(&me);
        if let Err(e) = core.store.on_session_closed(&me).await {
            tracing::error!(
                peer = %self.peer_addr,
                error = %e,
                "session store failed to discard closed session",
            );
        }
        *self.session.lock() = None;
        self.send(codec::session_closed()).await
    }

    /// Replace the bound session, deregistering any previous one.
    ///
    /// Registration of the new session is the caller's move, because it can
    /// fail against the per-session cap.
    pub(crate) fn set_session(&self, session: Option<Arc<Session>>) {
        if let (Ok(core), Ok(me)) = (self.server(), self.arc()) {
            if self.has_session() {
                core.registry.deregister(&me);
            }
        }
        *self.session.lock() = session;
    }

    /// Close the transport. The reader task observes the closure and runs
    /// the final cleanup.
    pub async fn close(&self) {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        let mut sink = self.writer.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(peer = %self.peer_addr, error = %e, "transport close failed");
        }
    }

    /// Final cleanup once the reader task has stopped: drain the writer,
    /// deregister the session (the session itself survives in the store for
    /// later restoration) and mark the connection closed.
    pub(crate) async fn finalize(&self) {
        self.state.store(STATE_CLOSING, Ordering::Release);
        {
            let mut sink = self.writer.lock().await;
            let _ = sink.close().await;
        }
        if let Ok(me) = self.arc() {
            if let Ok(core) = self.server() {
                core.registry.deregister(&me);
            }
        }
        self.state.store(STATE_CLOSED, Ordering::Release);
    }
}
