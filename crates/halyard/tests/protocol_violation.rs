//! Malformed frames over a raw WebSocket, bypassing the client entirely.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use halyard::prelude::*;
use halyard_testkit::{init_tracing, spawn_server};

async fn raw_socket(
    url: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("raw websocket connect");
    ws
}

#[tokio::test]
async fn unknown_tag_is_silently_ignored() {
    init_tracing();
    let handle = spawn_server(ServerOptions::default()).await;
    let mut ws = raw_socket(&handle.url()).await;

    // 200 is an unassigned tag; the server must neither answer nor close.
    ws.send(WsMessage::Binary(vec![200])).await.expect("send");
    let response = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(response.is_err(), "no response expected for an unknown tag");

    handle.stop().await;
}

#[tokio::test]
async fn name_overrun_is_answered_with_a_protocol_error_reply() {
    init_tracing();
    let handle = spawn_server(ServerOptions::default()).await;
    let mut ws = raw_socket(&handle.url()).await;

    // A binary request whose name-length flag (3) exceeds the single name
    // byte that follows.
    let malformed = vec![
        127, // binary request tag
        0, 0, 0, 0, 0, 0, 0, 0, // request id
        3,    // name length flag
        0x41, // name
    ];
    ws.send(WsMessage::Binary(malformed)).await.expect("send");

    let response = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("response in time")
        .expect("stream open")
        .expect("read");
    match response {
        WsMessage::Binary(data) => {
            // Protocol-error reply carrying the recovered request id.
            assert_eq!(data, vec![6, 0, 0, 0, 0, 0, 0, 0, 0]);
        }
        other => panic!("expected a binary reply, got {other:?}"),
    }

    handle.stop().await;
}

#[tokio::test]
async fn odd_utf16_request_is_answered_with_a_protocol_error_reply() {
    init_tracing();
    let handle = spawn_server(ServerOptions::default()).await;
    let mut ws = raw_socket(&handle.url()).await;

    // UTF-16 request with no name and a 3-byte payload.
    let malformed = vec![
        129, // utf16 request tag
        0, 0, 0, 0, 0, 0, 0, 9, // request id
        0, // name length flag
        0x00, 0x68, 0x00, // odd-length utf16 data
    ];
    ws.send(WsMessage::Binary(malformed)).await.expect("send");

    let response = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("response in time")
        .expect("stream open")
        .expect("read");
    match response {
        WsMessage::Binary(data) => {
            assert_eq!(data, vec![6, 0, 0, 0, 0, 0, 0, 0, 9]);
        }
        other => panic!("expected a binary reply, got {other:?}"),
    }

    handle.stop().await;
}
