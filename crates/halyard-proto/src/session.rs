//! Session wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session attributes, carried verbatim as JSON.
///
/// The framework stores and forwards this value but attributes no meaning
/// to it.
pub type SessionInfo = serde_json::Value;

/// A server-side record of a logical client identity.
///
/// Immutable once created; `last_lookup` is refreshed by the session store
/// on each successful lookup. Travels as JSON in session-created frames and
/// restoration replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub creation: DateTime<Utc>,
    #[serde(rename = "lastLookup")]
    pub last_lookup: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SessionInfo>,
}

impl Session {
    /// A fresh session: creation and last-lookup set to now.
    pub fn new(key: impl Into<String>, info: Option<SessionInfo>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            creation: now,
            last_lookup: now,
            info,
        }
    }
}
