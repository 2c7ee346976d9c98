//! halyard-proto: wire protocol for the halyard RPC framework.
//!
//! This crate defines:
//! - Message kind tags ([`MessageKind`])
//! - Payload encodings ([`Encoding`], [`Payload`])
//! - Frame parsing ([`Message`]) and construction ([`codec`])
//! - Wire-level JSON types ([`Session`], [`ReqErr`])
//! - The protocol version exchanged during the upgrade handshake
//!
//! A frame is a single WebSocket binary message. The first byte is the kind
//! tag; the remaining layout depends on the tag. See [`Message::parse`] for
//! the exact shapes.

pub mod codec;
mod error;
mod kind;
mod message;
mod payload;
mod session;

pub use error::*;
pub use kind::*;
pub use message::*;
pub use payload::*;
pub use session::*;

/// Protocol version advertised by the server during the upgrade handshake.
///
/// A client whose version differs is refused before the WebSocket is
/// established.
pub const PROTOCOL_VERSION: &str = "1.4";

/// HTTP header carrying [`PROTOCOL_VERSION`] on the upgrade request and
/// response.
pub const PROTOCOL_VERSION_HEADER: &str = "x-halyard-version";
