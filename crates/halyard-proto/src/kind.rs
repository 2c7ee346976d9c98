//! Message kind tags.

use core::fmt;

use crate::Encoding;

/// The first byte of every frame.
///
/// The numeric values are wire facts: both peers dispatch on them, so they
/// must never be reassigned. The tag space is split into disjoint blocks:
/// typed failure replies (0-6), session notifications (21-22), session
/// requests (31-32), signals (63-65), requests (127-129) and success
/// replies (191-193).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Request failed with a handler-produced error; body is a JSON
    /// [`ReqErr`](crate::ReqErr).
    ErrorReply = 0,
    /// Request rejected because the server is draining for shutdown.
    ReplyShutdown = 1,
    /// Request failed with an unrecoverable server-side error.
    ReplyInternalError = 2,
    /// Session restoration failed: the key is unknown to the store.
    SessionNotFound = 3,
    /// Session restoration refused: the per-session connection cap is hit.
    MaxSessConnsReached = 4,
    /// Session operation attempted against a server with sessions disabled.
    SessionsDisabled = 5,
    /// The peer's frame failed to parse but carried a recoverable request id.
    ReplyProtocolError = 6,

    /// Server notifies the client of a newly created session (JSON body).
    SessionCreated = 21,
    /// Server notifies the client that its session was closed.
    SessionClosed = 22,

    /// Client asks the server to close the active session.
    CloseSession = 31,
    /// Client asks the server to restore a session by key.
    RestoreSession = 32,

    SignalBinary = 63,
    SignalUtf8 = 64,
    SignalUtf16 = 65,

    RequestBinary = 127,
    RequestUtf8 = 128,
    RequestUtf16 = 129,

    ReplyBinary = 191,
    ReplyUtf8 = 192,
    ReplyUtf16 = 193,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ErrorReply),
            1 => Some(Self::ReplyShutdown),
            2 => Some(Self::ReplyInternalError),
            3 => Some(Self::SessionNotFound),
            4 => Some(Self::MaxSessConnsReached),
            5 => Some(Self::SessionsDisabled),
            6 => Some(Self::ReplyProtocolError),
            21 => Some(Self::SessionCreated),
            22 => Some(Self::SessionClosed),
            31 => Some(Self::CloseSession),
            32 => Some(Self::RestoreSession),
            63 => Some(Self::SignalBinary),
            64 => Some(Self::SignalUtf8),
            65 => Some(Self::SignalUtf16),
            127 => Some(Self::RequestBinary),
            128 => Some(Self::RequestUtf8),
            129 => Some(Self::RequestUtf16),
            191 => Some(Self::ReplyBinary),
            192 => Some(Self::ReplyUtf8),
            193 => Some(Self::ReplyUtf16),
            _ => None,
        }
    }

    /// True for the three request tags.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestBinary | Self::RequestUtf8 | Self::RequestUtf16
        )
    }

    /// True for the three signal tags.
    pub fn is_signal(self) -> bool {
        matches!(
            self,
            Self::SignalBinary | Self::SignalUtf8 | Self::SignalUtf16
        )
    }

    /// True when the frame layout carries an 8-byte request id after the tag.
    pub fn carries_ident(self) -> bool {
        !matches!(
            self,
            Self::SessionCreated
                | Self::SessionClosed
                | Self::SignalBinary
                | Self::SignalUtf8
                | Self::SignalUtf16
        )
    }

    /// The payload encoding implied by the tag, for the nine encoded kinds.
    pub fn encoding(self) -> Option<Encoding> {
        match self {
            Self::RequestBinary | Self::SignalBinary | Self::ReplyBinary => Some(Encoding::Binary),
            Self::RequestUtf8 | Self::SignalUtf8 | Self::ReplyUtf8 => Some(Encoding::Utf8),
            Self::RequestUtf16 | Self::SignalUtf16 | Self::ReplyUtf16 => Some(Encoding::Utf16),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ErrorReply => "error reply",
            Self::ReplyShutdown => "shutdown reply",
            Self::ReplyInternalError => "internal error reply",
            Self::SessionNotFound => "session not found",
            Self::MaxSessConnsReached => "max session connections reached",
            Self::SessionsDisabled => "sessions disabled",
            Self::ReplyProtocolError => "protocol error reply",
            Self::SessionCreated => "session created",
            Self::SessionClosed => "session closed",
            Self::CloseSession => "close session",
            Self::RestoreSession => "restore session",
            Self::SignalBinary => "binary signal",
            Self::SignalUtf8 => "utf8 signal",
            Self::SignalUtf16 => "utf16 signal",
            Self::RequestBinary => "binary request",
            Self::RequestUtf8 => "utf8 request",
            Self::RequestUtf16 => "utf16 request",
            Self::ReplyBinary => "binary reply",
            Self::ReplyUtf8 => "utf8 reply",
            Self::ReplyUtf16 => "utf16 reply",
        };
        f.write_str(name)
    }
}
