//! Server-pushed signals reach the client's signal hook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use halyard::prelude::*;
use halyard_testkit::{init_tracing, spawn_server};

/// Pushes every received signal straight back at the sender.
struct MirrorHandler;

#[async_trait]
impl ServerHandler for MirrorHandler {
    async fn on_signal(&self, conn: &Arc<Connection>, _name: Option<&str>, payload: Payload) {
        let _ = conn.signal(None, &payload).await;
    }
}

struct SignalRecorder {
    tx: Mutex<mpsc::UnboundedSender<Payload>>,
}

#[async_trait]
impl ClientHandler for SignalRecorder {
    async fn on_signal(&self, payload: Payload) {
        let _ = self.tx.lock().send(payload);
    }
}

#[tokio::test]
async fn pushed_signals_arrive_in_send_order() {
    init_tracing();
    let handle = spawn_server(ServerOptions {
        handler: Arc::new(MirrorHandler),
        ..Default::default()
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(
        handle.url(),
        ClientOptions {
            handler: Arc::new(SignalRecorder { tx: Mutex::new(tx) }),
            ..Default::default()
        },
    );
    client.connect().await.expect("connect");

    client
        .signal(None, Payload::utf16(vec![0x00, 0x68, 0x00, 0x69]))
        .await
        .expect("signal");

    let echoed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("pushed signal in time")
        .expect("channel open");
    assert_eq!(echoed.encoding, Encoding::Utf16);
    assert_eq!(&echoed.data[..], &[0x00, 0x68, 0x00, 0x69]);

    client.close().await;
    handle.stop().await;
}
