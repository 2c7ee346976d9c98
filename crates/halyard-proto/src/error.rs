//! Protocol errors and the wire-level request error body.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{MessageKind, RequestId};

/// Why an inbound frame failed to parse.
///
/// Whenever the malformed frame was long enough to contain the 8 id bytes of
/// an id-bearing kind, the id is preserved so the server can answer with a
/// protocol-error reply instead of dropping the frame on the floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Zero-length frame.
    Empty,
    /// The leading byte is not an assigned kind tag.
    UnknownKind(u8),
    /// The frame ends before its fixed-size fields do.
    Truncated {
        kind: MessageKind,
        ident: Option<RequestId>,
    },
    /// The declared name length exceeds the remaining bytes.
    NameOverrun {
        kind: MessageKind,
        ident: Option<RequestId>,
    },
    /// The name bytes are not valid UTF-8.
    BadName {
        kind: MessageKind,
        ident: Option<RequestId>,
    },
    /// A UTF-16 payload with an odd byte length.
    OddUtf16 {
        kind: MessageKind,
        ident: Option<RequestId>,
    },
}

impl ParseError {
    /// The request id salvaged from the malformed frame, if any.
    pub fn recoverable_ident(&self) -> Option<RequestId> {
        match self {
            Self::Empty | Self::UnknownKind(_) => None,
            Self::Truncated { ident, .. }
            | Self::NameOverrun { ident, .. }
            | Self::BadName { ident, .. }
            | Self::OddUtf16 { ident, .. } => *ident,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownKind(tag) => write!(f, "unknown kind tag {tag}"),
            Self::Truncated { kind, .. } => write!(f, "truncated {kind} frame"),
            Self::NameOverrun { kind, .. } => {
                write!(f, "{kind} frame name length exceeds frame size")
            }
            Self::BadName { kind, .. } => write!(f, "{kind} frame name is not valid UTF-8"),
            Self::OddUtf16 { kind, .. } => {
                write!(f, "{kind} frame carries UTF-16 data of odd length")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Why an outbound frame could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Names are limited to 255 bytes by the one-byte length field.
    NameTooLong(usize),
    /// UTF-16 data must have an even byte length.
    OddUtf16(usize),
    /// A JSON body failed to serialize.
    Json(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTooLong(len) => write!(f, "name of {len} bytes exceeds the 255-byte limit"),
            Self::OddUtf16(len) => write!(f, "UTF-16 payload has odd byte length {len}"),
            Self::Json(msg) => write!(f, "JSON body serialization failed: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// A handler-produced request error, carried as the JSON body of an
/// error-reply frame.
///
/// The code is chosen by the handler; the framework attributes no meaning
/// to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqErr {
    pub code: String,
    pub message: String,
}

impl ReqErr {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ReqErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ReqErr {}
