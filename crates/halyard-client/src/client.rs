//! Client core: connection management, reader task, session mirror.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use halyard_proto::{
    codec, Message, MessageKind, Payload, ReqErr, Session, PROTOCOL_VERSION,
    PROTOCOL_VERSION_HEADER,
};

use crate::handler::ClientHandler;
use crate::requests::RequestManager;
use crate::{Autoconnect, ClientOptions, Error};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
}

struct ClientInner {
    me: Weak<ClientInner>,
    url: String,
    autoconnect: bool,
    reconnection_interval: Duration,
    default_request_timeout: Duration,
    handler: Arc<dyn ClientHandler>,

    status: Mutex<Status>,
    /// Set by `close`; suppresses implicit operations and auto-reconnect
    /// until the next explicit `connect`.
    closed: AtomicBool,
    /// Serialises connection attempts so concurrent `connect` callers share
    /// one handshake.
    connect_flight: tokio::sync::Mutex<()>,
    /// The per-connection writer mutex; `None` while disconnected.
    writer: tokio::sync::Mutex<Option<WsSink>>,
    /// Bumped on every established connection so a stale reader task cannot
    /// clobber the state of its successor.
    generation: AtomicU64,
    requests: RequestManager,
    session: Mutex<Option<Session>>,
}

/// A halyard client.
///
/// All operations take `&self`; the client is internally synchronised and
/// can be shared across tasks behind a clone-cheap handle.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// `url` is the `ws://host:port` endpoint of a halyard server.
    pub fn new(url: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            inner: Arc::new_cyclic(|me| ClientInner {
                me: me.clone(),
                url: url.into(),
                autoconnect: options.autoconnect == Autoconnect::Enabled,
                reconnection_interval: options.reconnection_interval,
                default_request_timeout: options.default_request_timeout,
                handler: options.handler,
                status: Mutex::new(Status::Disconnected),
                closed: AtomicBool::new(false),
                connect_flight: tokio::sync::Mutex::new(()),
                writer: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                requests: RequestManager::new(),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> Status {
        *self.inner.status.lock()
    }

    /// The mirrored session, if one is active (or was active when the
    /// connection dropped).
    pub fn session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    pub fn session_key(&self) -> Option<String> {
        self.inner.session.lock().as_ref().map(|s| s.key.clone())
    }

    /// Establish the connection.
    ///
    /// Safe to call concurrently: callers serialise on one in-flight
    /// handshake and piggyback on its result. Re-enables a client that was
    /// [`close`](Client::close)d. If a session is mirrored locally, it is
    /// restored silently after the transport comes up.
    pub async fn connect(&self) -> Result<(), Error> {
        self.inner.closed.store(false, Ordering::Release);
        self.inner.connect().await
    }

    /// Send a request and await its reply, under the default timeout.
    pub async fn request(&self, name: Option<&str>, payload: Payload) -> Result<Payload, Error> {
        self.request_with_timeout(name, payload, self.inner.default_request_timeout)
            .await
    }

    /// Send a request and await its reply, under an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        name: Option<&str>,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, Error> {
        let inner = &self.inner;
        let deadline = Instant::now() + timeout;
        inner.ensure_connected(deadline).await?;

        let (ident, rx) = inner.requests.register();
        let frame = match codec::request(ident, name, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                inner.requests.remove(ident);
                return Err(e.into());
            }
        };
        if let Err(e) = inner.send(frame).await {
            inner.requests.remove(ident);
            return Err(e);
        }
        inner.await_reply(ident, rx, deadline).await
    }

    /// Fire-and-forget payload delivery to the server.
    pub async fn signal(&self, name: Option<&str>, payload: Payload) -> Result<(), Error> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.default_request_timeout;
        inner.ensure_connected(deadline).await?;
        inner.send(codec::signal(name, &payload)?).await
    }

    /// Restore a session by key and publish it to the local mirror.
    pub async fn restore_session(&self, key: &str) -> Result<(), Error> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.default_request_timeout;
        inner.ensure_connected(deadline).await?;
        inner.restore_on_wire(key, deadline).await
    }

    /// Close the active session.
    ///
    /// Connected, this asks the server to destroy the session. Disconnected,
    /// the session is merely forgotten locally — no wire traffic, no store
    /// involvement; the server keeps it until a later restoration settles
    /// its fate.
    pub async fn close_session(&self) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.session.lock().is_none() {
            return Ok(());
        }
        if *inner.status.lock() != Status::Connected {
            *inner.session.lock() = None;
            return Ok(());
        }

        let deadline = Instant::now() + inner.default_request_timeout;
        let (ident, rx) = inner.requests.register();
        if let Err(e) = inner.send(codec::close_session(ident)).await {
            inner.requests.remove(ident);
            return Err(e);
        }
        inner.await_reply(ident, rx, deadline).await?;
        *inner.session.lock() = None;
        Ok(())
    }

    /// Drop the connection and fail all pending requests.
    ///
    /// The client will not auto-reconnect afterwards, but an explicit
    /// [`connect`](Client::connect) revives it. The session mirror is kept,
    /// so a revived client restores its session.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::Release);
        *inner.status.lock() = Status::Disconnected;
        if let Some(mut sink) = inner.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        inner.requests.fail_all(Error::Disconnected);
    }
}

impl ClientInner {
    fn arc(&self) -> Arc<ClientInner> {
        self.me.upgrade().expect("client inner is alive while in use")
    }

    /// Single-flight connect.
    fn connect(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            let _flight = self.connect_flight.lock().await;
            if *self.status.lock() == Status::Connected {
                return Ok(());
            }
            *self.status.lock() = Status::Connecting;

            let (sink, stream) = match self.dial().await {
                Ok(halves) => halves,
                Err(e) => {
                    *self.status.lock() = Status::Disconnected;
                    return Err(e);
                }
            };

            *self.writer.lock().await = Some(sink);
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *self.status.lock() = Status::Connected;

            let inner = self.arc();
            tokio::spawn(async move {
                inner.read_task(stream, generation).await;
            });

            // Pick the session back up where the previous connection left it.
            let mirrored_key = self.session.lock().as_ref().map(|s| s.key.clone());
            if let Some(key) = mirrored_key {
                let deadline = Instant::now() + self.default_request_timeout;
                if let Err(e) = self.restore_on_wire(&key, deadline).await {
                    tracing::warn!(
                        session_key = %key,
                        error = %e,
                        "silent session restoration failed; dropping the local session",
                    );
                    *self.session.lock() = None;
                }
            }
            Ok(())
        })
    }

    /// Perform the WebSocket upgrade, negotiating the protocol version.
    async fn dial(&self) -> Result<(WsSink, WsStream), Error> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Handshake(e.to_string()))?;
        request.headers_mut().insert(
            PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        if let Some(advertised) = response.headers().get(PROTOCOL_VERSION_HEADER) {
            if advertised.as_bytes() != PROTOCOL_VERSION.as_bytes() {
                return Err(Error::Handshake(format!(
                    "server speaks protocol version {:?}, this client speaks {}",
                    advertised, PROTOCOL_VERSION,
                )));
            }
        }

        let (sink, stream) = ws.split();
        Ok((sink, stream))
    }

    /// Resolve the connect policy for an outbound operation.
    async fn ensure_connected(&self, deadline: Instant) -> Result<(), Error> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Disconnected);
            }
            if *self.status.lock() == Status::Connected {
                return Ok(());
            }
            if !self.autoconnect {
                return Err(Error::Disconnected);
            }
            if self.connect().await.is_ok() {
                return Ok(());
            }
            if Instant::now() + self.reconnection_interval >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(self.reconnection_interval).await;
        }
    }

    async fn send(&self, frame: Bytes) -> Result<(), Error> {
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(Error::Disconnected)?;
        sink.send(WsMessage::Binary(frame.to_vec()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn await_reply(
        &self,
        ident: halyard_proto::RequestId,
        rx: tokio::sync::oneshot::Receiver<Result<Payload, Error>>,
        deadline: Instant,
    ) -> Result<Payload, Error> {
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                // Give up locally; a reply showing up later is dropped.
                self.requests.remove(ident);
                Err(Error::Timeout)
            }
        }
    }

    /// Restoration against an established connection.
    async fn restore_on_wire(&self, key: &str, deadline: Instant) -> Result<(), Error> {
        let (ident, rx) = self.requests.register();
        if let Err(e) = self.send(codec::restore_session(ident, key)).await {
            self.requests.remove(ident);
            return Err(e);
        }
        let payload = self.await_reply(ident, rx, deadline).await?;
        let session: Session = serde_json::from_slice(&payload.data)
            .map_err(|e| Error::Session(format!("restoration reply: {e}")))?;
        *self.session.lock() = Some(session);
        Ok(())
    }

    /// One blocking reader per connection, dispatching frames in receive
    /// order.
    async fn read_task(self: Arc<Self>, mut stream: WsStream, generation: u64) {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => self.handle_frame(&data).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "transport read failed");
                    break;
                }
            }
        }
        self.handle_disconnect(generation).await;
    }

    async fn handle_frame(&self, raw: &[u8]) {
        let msg = match Message::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame from server");
                return;
            }
        };

        match msg.kind {
            MessageKind::ReplyBinary | MessageKind::ReplyUtf8 | MessageKind::ReplyUtf16 => {
                if let Some(ident) = msg.ident {
                    self.requests.fulfill(ident, msg.payload);
                }
            }
            MessageKind::ErrorReply => {
                if let Some(ident) = msg.ident {
                    let err = serde_json::from_slice::<ReqErr>(&msg.payload.data)
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "undecodable error reply body");
                            ReqErr::new("", "")
                        });
                    self.requests.fail(ident, Error::Request(err));
                }
            }
            MessageKind::ReplyShutdown => self.fail_typed(msg, Error::ServerShutdown),
            MessageKind::ReplyInternalError => self.fail_typed(msg, Error::Internal),
            MessageKind::ReplyProtocolError => self.fail_typed(msg, Error::Protocol),
            MessageKind::SessionNotFound => self.fail_typed(msg, Error::SessionNotFound),
            MessageKind::MaxSessConnsReached => self.fail_typed(msg, Error::MaxSessConnsReached),
            MessageKind::SessionsDisabled => self.fail_typed(msg, Error::SessionsDisabled),
            MessageKind::SignalBinary | MessageKind::SignalUtf8 | MessageKind::SignalUtf16 => {
                self.handler.on_signal(msg.payload).await;
            }
            MessageKind::SessionCreated => {
                let session = match serde_json::from_slice::<Session>(&msg.payload.data) {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::error!(error = %e, "undecodable session-created body");
                        return;
                    }
                };
                *self.session.lock() = Some(session.clone());
                self.handler.on_session_created(&session).await;
            }
            MessageKind::SessionClosed => {
                *self.session.lock() = None;
                self.handler.on_session_closed().await;
            }
            other => {
                tracing::warn!(kind = %other, "dropping unexpected frame from server");
            }
        }
    }

    fn fail_typed(&self, msg: Message, error: Error) {
        if let Some(ident) = msg.ident {
            self.requests.fail(ident, error);
        }
    }

    /// Transport loss. Only the reader of the current connection generation
    /// may act; a stale reader finishing late must not disturb the state of
    /// the connection that replaced it.
    async fn handle_disconnect(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *self.status.lock() = Status::Disconnected;
        *self.writer.lock().await = None;
        self.requests.fail_all(Error::Disconnected);

        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.handler.on_disconnected().await;

        if self.autoconnect {
            let inner = self.arc();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(inner.reconnection_interval).await;
                    if inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    match inner.connect().await {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::debug!(error = %e, "reconnection attempt failed");
                        }
                    }
                }
            });
        }
    }
}
