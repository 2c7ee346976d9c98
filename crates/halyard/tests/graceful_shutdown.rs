//! Graceful shutdown: in-flight work drains, late work is refused.
//!
//! signal:     --->||||||||||--------------- (must finish)
//! request:    ---->|||||||||--------------- (must finish)
//! shutdown:   -------->|||||---------------- (must await both)
//! late conn:  ---------->|------------------ (must be rejected)
//! late req:   ----------->|----------------- (must be rejected)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use halyard::prelude::*;
use halyard::ClientError;
use halyard_testkit::{init_tracing, spawn_server};

struct SlowHandler {
    signal_finished: Arc<AtomicBool>,
}

#[async_trait]
impl ServerHandler for SlowHandler {
    async fn on_signal(&self, _conn: &Arc<Connection>, _name: Option<&str>, _payload: Payload) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.signal_finished.store(true, Ordering::Release);
    }

    async fn on_request(
        &self,
        _conn: &Arc<Connection>,
        _name: Option<&str>,
        _payload: Payload,
    ) -> Result<Payload, ReqErr> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Payload::text("ifinished"))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_in_flight_work_and_refuses_late_work() {
    init_tracing();
    let signal_finished = Arc::new(AtomicBool::new(false));
    let handle = spawn_server(ServerOptions {
        handler: Arc::new(SlowHandler {
            signal_finished: signal_finished.clone(),
        }),
        ..Default::default()
    })
    .await;
    let url = handle.url();

    let options = || ClientOptions {
        default_request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let sig_client = Client::new(url.clone(), options());
    let req_client = Client::new(url.clone(), options());
    let late_req_client = Client::new(url.clone(), options());
    sig_client.connect().await.expect("connect signal client");
    req_client.connect().await.expect("connect request client");
    late_req_client
        .connect()
        .await
        .expect("connect late-request client");

    // Put a slow signal and a slow request in flight.
    sig_client
        .signal(None, Payload::text("work"))
        .await
        .expect("signal");
    let req_task = {
        let client = req_client.clone();
        tokio::spawn(async move { client.request(None, Payload::text("work")).await })
    };

    // Give both operations time to reach their handlers, then start the
    // shutdown in the background.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let shutdown_started = Instant::now();
    let shutdown_task = {
        let server = handle.server.clone();
        tokio::spawn(async move {
            server.shutdown().await;
        })
    };

    // While the drain is running, connections and requests are refused.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let late_conn_client = Client::new(
        url.clone(),
        ClientOptions {
            autoconnect: Autoconnect::Disabled,
            ..Default::default()
        },
    );
    late_conn_client
        .connect()
        .await
        .expect_err("late connection must be rejected");

    let err = late_req_client
        .request(None, Payload::text("too late"))
        .await
        .expect_err("late request must be rejected");
    assert_eq!(err, ClientError::ServerShutdown);

    // The drain holds shutdown until both slow handlers completed.
    shutdown_task.await.expect("shutdown task");
    assert!(
        shutdown_started.elapsed() >= Duration::from_millis(50),
        "shutdown must have awaited the in-flight handlers",
    );
    assert!(
        signal_finished.load(Ordering::Acquire),
        "signal handler must have run to completion",
    );
    let reply = req_task
        .await
        .expect("request task")
        .expect("in-flight request must succeed");
    assert_eq!(&reply.data[..], b"ifinished");

    handle.stop().await;
}
