//! halyard-client: the client side of the halyard RPC framework.
//!
//! A [`Client`] correlates outbound requests to inbound replies by 8-byte
//! ids, translates typed failure replies into [`Error`] values, mirrors the
//! server-side session, and — with autoconnect enabled — transparently
//! re-establishes a dropped connection on the next outbound operation,
//! silently restoring the session it was carrying.

mod client;
mod error;
mod handler;
mod options;
mod requests;

pub use client::{Client, Status};
pub use error::Error;
pub use handler::ClientHandler;
pub use options::{Autoconnect, ClientOptions};
