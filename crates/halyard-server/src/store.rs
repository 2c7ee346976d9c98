//! Session persistence port and the default file-backed store.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use halyard_proto::{Session, SessionInfo};

use crate::Connection;

/// Errors from a session store are opaque to the framework; they are either
/// logged (creation, closure) or mapped to an internal-error reply (lookup).
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The persistence port the server drives for restorable sessions.
///
/// The framework is not responsible for durably storing sessions; that is
/// the store's job, and the store decides where (filesystem, database,
/// memory).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Invoked after the new session has been synchronized to the client.
    ///
    /// A failure is logged but does not tear the session down; the session
    /// keeps working for the live connection and merely cannot be restored
    /// later.
    async fn on_session_created(&self, conn: &Arc<Connection>) -> Result<(), StoreError>;

    /// Look up a stored session by key, refreshing its last-lookup time.
    ///
    /// `Ok(None)` means the key is unknown. An error fails the restoration
    /// with an internal-error reply.
    async fn on_session_lookup(&self, key: &str) -> Result<Option<Session>, StoreError>;

    /// Invoked when the session bound to the connection is being closed.
    ///
    /// A failure is logged but does not fail the closure.
    async fn on_session_closed(&self, conn: &Arc<Connection>) -> Result<(), StoreError>;
}

/// Store installed when sessions are disabled; it can never be reached
/// with a session to persist, and it knows no keys.
pub(crate) struct NullSessionStore;

#[async_trait]
impl SessionStore for NullSessionStore {
    async fn on_session_created(&self, _conn: &Arc<Connection>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn on_session_lookup(&self, _key: &str) -> Result<Option<Session>, StoreError> {
        Ok(None)
    }

    async fn on_session_closed(&self, _conn: &Arc<Connection>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Serialization shape of one session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    #[serde(rename = "c")]
    creation: DateTime<Utc>,
    #[serde(rename = "i")]
    info: Option<SessionInfo>,
}

const SESSION_FILE_EXT: &str = "wwrsess";
const DEFAULT_SESSION_DIR: &str = "wwrsess";
#[cfg(unix)]
const SESSION_FILE_MODE: u32 = 0o640;

/// File-backed [`SessionStore`]: one `<key>.wwrsess` JSON file per session.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open a store in the default location, `<cwd>/wwrsess`.
    pub fn in_default_dir() -> io::Result<Self> {
        Self::new(std::env::current_dir()?.join(DEFAULT_SESSION_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SESSION_FILE_EXT}"))
    }

    async fn write_file(&self, key: &str, file: &SessionFile) -> Result<(), StoreError> {
        let body = serde_json::to_vec(file)?;
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(SESSION_FILE_MODE);
        let mut out = options.open(self.file_path(key)).await?;
        out.write_all(&body).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn on_session_created(&self, conn: &Arc<Connection>) -> Result<(), StoreError> {
        let Some(session) = conn.session() else {
            return Ok(());
        };
        let file = SessionFile {
            creation: session.creation,
            info: session.info.clone(),
        };
        self.write_file(&session.key, &file).await
    }

    async fn on_session_lookup(&self, key: &str) -> Result<Option<Session>, StoreError> {
        let contents = match tokio::fs::read(self.file_path(key)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: SessionFile = serde_json::from_slice(&contents)?;
        Ok(Some(Session {
            key: key.to_owned(),
            creation: file.creation,
            last_lookup: Utc::now(),
            info: file.info,
        }))
    }

    async fn on_session_closed(&self, conn: &Arc<Connection>) -> Result<(), StoreError> {
        let Some(key) = conn.session_key() else {
            return Ok(());
        };
        tokio::fs::remove_file(self.file_path(&key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_of_unknown_key_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        let found = store.on_session_lookup("missing").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn file_round_trip_refreshes_last_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();

        let created = Session::new("abc", Some(serde_json::json!({"user": "u1"})));
        let file = SessionFile {
            creation: created.creation,
            info: created.info.clone(),
        };
        store.write_file(&created.key, &file).await.unwrap();

        let found = store.on_session_lookup("abc").await.unwrap().unwrap();
        assert_eq!(found.key, "abc");
        assert_eq!(found.creation, created.creation);
        assert_eq!(found.info, created.info);
        assert!(found.last_lookup >= created.last_lookup);
    }

    #[tokio::test]
    async fn session_file_body_uses_short_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        let file = SessionFile {
            creation: Utc::now(),
            info: None,
        };
        store.write_file("k", &file).await.unwrap();

        let body = tokio::fs::read_to_string(store.file_path("k")).await.unwrap();
        assert!(body.contains("\"c\""));
        assert!(body.contains("\"i\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_files_are_mode_0640() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path()).unwrap();
        let file = SessionFile {
            creation: Utc::now(),
            info: None,
        };
        store.write_file("perms", &file).await.unwrap();

        let meta = std::fs::metadata(store.file_path("perms")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
    }
}
