//! Server configuration.

use std::sync::Arc;

use rand::Rng;

use halyard_proto::SessionInfo;

use crate::handler::DefaultHandler;
use crate::{ServerHandler, SessionStore};

/// Produces keys for newly created sessions.
pub type SessionKeyGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Normalises the raw JSON session info into the structured form handlers
/// should see. Absent a parser, the raw form is kept.
pub type SessionInfoParser = Arc<dyn Fn(&SessionInfo) -> SessionInfo + Send + Sync>;

/// Server construction options.
pub struct ServerOptions {
    /// Whether session creation and restoration are serviced at all.
    pub sessions_enabled: bool,
    /// Per-session connection cap; 0 means unlimited.
    pub max_session_connections: usize,
    /// Persistence port. When sessions are enabled and no store is given,
    /// the file-backed store in its default directory is used.
    pub session_store: Option<Arc<dyn SessionStore>>,
    /// Key generator; defaults to a 32-character random alphanumeric token.
    pub session_key_generator: Option<SessionKeyGenerator>,
    /// Optional session info normaliser.
    pub session_info_parser: Option<SessionInfoParser>,
    /// User hooks.
    pub handler: Arc<dyn ServerHandler>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            sessions_enabled: false,
            max_session_connections: 0,
            session_store: None,
            session_key_generator: None,
            session_info_parser: None,
            handler: Arc::new(DefaultHandler),
        }
    }
}

const SESSION_KEY_LENGTH: usize = 32;

/// 32 alphanumeric characters out of a 62-character alphabet, ~190 bits of
/// entropy.
pub(crate) fn default_session_key() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..SESSION_KEY_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
