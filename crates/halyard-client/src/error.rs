//! Client-side error taxonomy.

use core::fmt;

use halyard_proto::{EncodeError, ReqErr};

/// Every way a client operation can fail.
///
/// The typed failure replies of the wire protocol map one-to-one onto
/// variants here; the rest are produced locally. `Clone` because a single
/// disconnect fails every pending request with the same error.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The handler on the server answered with an error.
    Request(ReqErr),
    /// The server failed internally while handling the request.
    Internal,
    /// The server is draining for shutdown and refused the request.
    ServerShutdown,
    /// The server could not parse our frame.
    Protocol,
    /// Session restoration failed: the key is unknown to the server.
    SessionNotFound,
    /// Session restoration refused: the per-session connection cap is hit.
    MaxSessConnsReached,
    /// The server has sessions disabled.
    SessionsDisabled,
    /// The deadline elapsed before a reply arrived.
    Timeout,
    /// No connection, and autoconnect is disabled or the client is closed.
    Disconnected,
    /// The WebSocket handshake failed or the protocol versions differ.
    Handshake(String),
    /// The established transport failed.
    Transport(String),
    /// A session payload could not be understood.
    Session(String),
    /// An outbound frame could not be built.
    Encode(EncodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "request failed: {err}"),
            Self::Internal => write!(f, "internal server error"),
            Self::ServerShutdown => write!(f, "server is shutting down"),
            Self::Protocol => write!(f, "server reported a protocol violation"),
            Self::SessionNotFound => write!(f, "session not found"),
            Self::MaxSessConnsReached => {
                write!(f, "the session's connection limit has been reached")
            }
            Self::SessionsDisabled => write!(f, "sessions are disabled on the server"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Disconnected => write!(f, "client is disconnected"),
            Self::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Session(msg) => write!(f, "session error: {msg}"),
            Self::Encode(e) => write!(f, "frame encoding failed: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}
