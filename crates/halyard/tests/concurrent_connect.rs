//! Concurrent `connect` calls share a single handshake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use halyard::prelude::*;
use halyard::Status;
use halyard_testkit::{init_tracing, spawn_server};

#[derive(Default)]
struct CountingHandler {
    connected: AtomicUsize,
}

#[async_trait]
impl ServerHandler for CountingHandler {
    async fn on_client_connected(&self, _conn: &Arc<Connection>) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sixteen_concurrent_connects_perform_one_handshake() {
    init_tracing();
    let handler = Arc::new(CountingHandler::default());
    let handle = spawn_server(ServerOptions {
        handler: handler.clone(),
        ..Default::default()
    })
    .await;

    let client = Client::new(handle.url(), ClientOptions::default());
    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        })
        .collect();
    for attempt in attempts {
        attempt
            .await
            .expect("connect task")
            .expect("concurrent connect");
    }

    assert_eq!(client.status(), Status::Connected);
    assert_eq!(
        handler.connected.load(Ordering::SeqCst),
        1,
        "exactly one handshake must have reached the server",
    );

    client.close().await;
    handle.stop().await;
}
