//! Server-side errors.

use core::fmt;

use halyard_proto::EncodeError;

/// Errors surfaced by connection and session operations on the server.
#[derive(Debug)]
pub enum Error {
    /// The connection (or the server owning it) is gone.
    Closed,
    /// A frame could not be written to the peer.
    Transport(String),
    /// A session operation was attempted with sessions disabled.
    SessionsDisabled,
    /// `create_session` was called on a connection that already has one.
    SessionActive,
    /// The per-session connection cap would be exceeded.
    MaxSessConnsReached,
    /// An outbound frame could not be built.
    Encode(EncodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::SessionsDisabled => write!(f, "sessions are disabled on this server"),
            Self::SessionActive => write!(f, "connection already has an active session"),
            Self::MaxSessConnsReached => {
                write!(f, "the session's connection limit has been reached")
            }
            Self::Encode(e) => write!(f, "frame encoding failed: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}
