//! halyard-server: the server side of the halyard RPC framework.
//!
//! A [`Server`] accepts WebSocket connections, decodes frames, and routes
//! them to a user-provided [`ServerHandler`]: requests are answered on
//! spawned worker tasks, signals are fire-and-forget, and the session
//! operations (creation, restoration by key, closure) are serviced by the
//! framework against a pluggable [`SessionStore`].
//!
//! Shutdown is graceful: [`Server::shutdown`] stops accepting connections
//! and rejects new operations while draining the handlers already in
//! flight.

mod connection;
mod error;
mod handler;
mod options;
mod registry;
mod server;
mod store;

pub use connection::Connection;
pub use error::Error;
pub use handler::ServerHandler;
pub use options::{ServerOptions, SessionInfoParser, SessionKeyGenerator};
pub use registry::SessionRegistry;
pub use server::Server;
pub use store::{FileSessionStore, SessionStore, StoreError};
