//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::handler::DefaultClientHandler;
use crate::ClientHandler;

/// Whether outbound operations on a disconnected client transparently
/// re-establish the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autoconnect {
    #[default]
    Enabled,
    Disabled,
}

/// Client construction options.
pub struct ClientOptions {
    pub autoconnect: Autoconnect,
    /// Pause between reconnection attempts.
    pub reconnection_interval: Duration,
    /// Deadline applied to requests without an explicit timeout.
    pub default_request_timeout: Duration,
    /// User hooks.
    pub handler: Arc<dyn ClientHandler>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            autoconnect: Autoconnect::Enabled,
            reconnection_interval: Duration::from_secs(2),
            default_request_timeout: Duration::from_secs(60),
            handler: Arc::new(DefaultClientHandler),
        }
    }
}
