//! Session creation, manual restoration by key, and the per-session
//! connection cap.

use std::sync::Arc;

use async_trait::async_trait;

use halyard::prelude::*;
use halyard::ClientError;
use halyard_testkit::{init_tracing, spawn_server, MemorySessionStore};

/// "login" creates a session; "whoami" answers with the bound session key.
struct LoginHandler;

#[async_trait]
impl ServerHandler for LoginHandler {
    async fn on_request(
        &self,
        conn: &Arc<Connection>,
        name: Option<&str>,
        _payload: Payload,
    ) -> Result<Payload, ReqErr> {
        match name {
            Some("login") => {
                let session = conn
                    .create_session(Some(serde_json::json!({"role": "admin"})))
                    .await
                    .map_err(|e| ReqErr::new("login_failed", e.to_string()))?;
                Ok(Payload::text(session.key.clone()))
            }
            Some("whoami") => Ok(Payload::text(conn.session_key().unwrap_or_default())),
            _ => Err(ReqErr::new("unknown_target", "unhandled request")),
        }
    }
}

fn session_options(store: Arc<MemorySessionStore>, max_conns: usize) -> ServerOptions {
    ServerOptions {
        sessions_enabled: true,
        max_session_connections: max_conns,
        session_store: Some(store),
        handler: Arc::new(LoginHandler),
        ..Default::default()
    }
}

#[tokio::test]
async fn session_is_restorable_by_key_from_a_second_client() {
    init_tracing();
    let store = Arc::new(MemorySessionStore::new());
    let handle = spawn_server(session_options(store.clone(), 0)).await;

    // First client logs in and takes its session key away.
    let first = Client::new(handle.url(), ClientOptions::default());
    first.connect().await.expect("connect first");
    let reply = first
        .request(Some("login"), Payload::default())
        .await
        .expect("login");
    let key = String::from_utf8(reply.data.to_vec()).expect("key is utf8");

    // The session-created notification precedes the login reply, so the
    // mirror is already populated.
    let created = first.session().expect("mirror populated");
    assert_eq!(created.key, key);
    assert_eq!(created.info, Some(serde_json::json!({"role": "admin"})));
    assert!(store.contains(&key));
    first.close().await;

    // A fresh client restores the session manually from the bare key.
    let second = Client::new(handle.url(), ClientOptions::default());
    second.connect().await.expect("connect second");
    assert!(second.session().is_none());

    second.restore_session(&key).await.expect("restore");
    let restored = second.session().expect("restored mirror");
    assert_eq!(restored.key, created.key);
    assert_eq!(restored.creation, created.creation);
    assert_eq!(restored.info, created.info);

    // The server agrees: requests now run against the restored session.
    let reply = second
        .request(Some("whoami"), Payload::default())
        .await
        .expect("whoami");
    assert_eq!(String::from_utf8(reply.data.to_vec()).unwrap(), key);

    second.close().await;
    handle.stop().await;
}

#[tokio::test]
async fn connection_cap_refuses_excess_restorations() {
    init_tracing();
    let store = Arc::new(MemorySessionStore::new());
    let handle = spawn_server(session_options(store.clone(), 1)).await;

    let first = Client::new(handle.url(), ClientOptions::default());
    first.connect().await.expect("connect first");
    first
        .request(Some("login"), Payload::default())
        .await
        .expect("login");
    let key = first.session_key().expect("session key");
    assert_eq!(handle.server.session_connections_num(&key), Some(1));

    // While the first connection still occupies the only slot, a second
    // restoration of the same key must be refused.
    let second = Client::new(handle.url(), ClientOptions::default());
    second.connect().await.expect("connect second");
    let err = second
        .restore_session(&key)
        .await
        .expect_err("cap must refuse");
    assert_eq!(err, ClientError::MaxSessConnsReached);
    assert!(second.session().is_none());

    // A key never seen by the registry reports no bucket at all.
    assert_eq!(handle.server.session_connections_num("unseen"), None);
    assert_eq!(handle.server.active_sessions_num(), 1);

    first.close().await;
    second.close().await;
    handle.stop().await;
}
