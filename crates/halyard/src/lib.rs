//! halyard: bidirectional, message-oriented RPC over WebSocket.
//!
//! Four primitives between a client and a server:
//!
//! - **request/reply**, correlated by 8-byte ids, with typed error replies
//! - **server-pushed signals** and **client-pushed signals**
//! - **sessions**: created on the server, mirrored on the client,
//!   restorable by key through a pluggable store, closable from either side
//!
//! Payloads travel in one of three encodings (binary, UTF-8, UTF-16) and are
//! never interpreted by the framework. Servers shut down gracefully,
//! draining in-flight handlers while refusing new work; clients can
//! transparently reconnect and pick their session back up.
//!
//! This crate is a facade over `halyard-proto`, `halyard-server` and
//! `halyard-client`; most users only need [`prelude`].

pub use halyard_proto::{
    codec, EncodeError, Encoding, Message, MessageKind, ParseError, Payload, ReqErr, RequestId,
    Session, SessionInfo, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
};

pub use halyard_server::{
    Connection, Error as ServerError, FileSessionStore, Server, ServerHandler, ServerOptions,
    SessionInfoParser, SessionKeyGenerator, SessionRegistry, SessionStore, StoreError,
};

pub use halyard_client::{
    Autoconnect, Client, ClientHandler, ClientOptions, Error as ClientError, Status,
};

pub mod prelude {
    //! The commonly-needed surface in one import.
    pub use crate::{
        Autoconnect, Client, ClientError, ClientHandler, ClientOptions, Connection, Encoding,
        Payload, ReqErr, Server, ServerError, ServerHandler, ServerOptions, Session, SessionStore,
        Status,
    };
}
