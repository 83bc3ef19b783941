// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end test: a fake upstream advertises a channel and publishes a
//! message, a client attaches through the real control surface and
//! subscribes, and the message round-trips over the served WebSocket.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use fgbridge::registry::TargetRegistry;
use fgbridge::state::AppState;
use fgbridge::transport::build_router;

type UpstreamHalves = (
    futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>, WsMessage>,
    futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>>,
);

/// Accept a single upstream connection and hand back its split halves.
async fn fake_upstream() -> (String, tokio::task::JoinHandle<UpstreamHalves>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake upstream listener");
    let addr = listener.local_addr().expect("read listener local addr");
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept fake upstream connection");
        tokio_tungstenite::accept_async(stream).await.expect("complete websocket handshake").split()
    });
    (format!("ws://{addr}"), handle)
}

/// Spin up the real router on an ephemeral TCP port and return the served
/// WebSocket URL plus the temp dirs that must outlive the test.
async fn spin_up_bridge(url: &str) -> (String, TempDir, TempDir) {
    let layouts_tmp = TempDir::new().expect("create layouts temp dir");
    let data_tmp = TempDir::new().expect("create data temp dir");
    let registry = TargetRegistry::new(data_tmp.path().to_owned(), Duration::from_secs(900), 7, Duration::from_secs(3600));
    registry
        .sync(vec![fgbridge::registry::DesiredTarget { url: url.to_owned(), retention: true, topic_filter: None }])
        .await;
    let state = AppState::new(layouts_tmp.path().to_owned(), Arc::clone(&registry));
    let router = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind bridge listener");
    let addr = listener.local_addr().expect("read listener local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve bridge router");
    });

    (format!("ws://{addr}/ws/{}", fgbridge::layouts::slugify(url)), layouts_tmp, data_tmp)
}

async fn next_text(
    read: &mut futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
) -> String {
    loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => return text.to_string(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn client_receives_live_message_after_subscribing() {
    let (upstream_url, upstream_handle) = fake_upstream().await;
    let (ws_url, _layouts_tmp, _data_tmp) = spin_up_bridge(&upstream_url).await;

    let (mut up_write, mut up_read) = upstream_handle.await.expect("fake upstream accept task");

    let advertise = serde_json::json!({
        "op": "advertise",
        "channels": [{"id": 7, "topic": "/a", "encoding": "json"}],
    });
    up_write.send(WsMessage::Text(advertise.to_string().into())).await.expect("send advertise frame");
    let _subscribe_frame = up_read.next().await.expect("subscribe frame arrives").expect("read subscribe frame");

    let mut request = ws_url.into_client_request().expect("build client request from url");
    request.headers_mut().insert("sec-websocket-protocol", "foxglove.websocket.v1".parse().expect("valid header value"));
    let (client, response) = tokio_tungstenite::connect_async(request).await.expect("connect to bridge websocket");
    assert_eq!(
        response.headers().get("sec-websocket-protocol").and_then(|v| v.to_str().ok()),
        Some("foxglove.websocket.v1")
    );
    let (mut client_write, mut client_read) = client.split();

    let add_channel: serde_json::Value = serde_json::from_str(&next_text(&mut client_read).await).expect("parse add_channel json");
    assert_eq!(add_channel["op"], "add_channel");
    let server_channel_id = add_channel["server_channel_id"].as_u64().expect("server_channel_id is a number") as u32;

    let subscribe = serde_json::json!({"op": "subscribe", "server_channel_id": server_channel_id});
    client_write.send(WsMessage::Text(subscribe.to_string().into())).await.expect("send subscribe frame");

    let payload = BASE64.encode(b"{\"x\":1}");
    let message = serde_json::json!({
        "op": "message",
        "subscription_id": 1,
        "channel_id": 7,
        "timestamp": 1_000_000_000u64,
        "data": payload,
    });
    up_write.send(WsMessage::Text(message.to_string().into())).await.expect("send message frame");

    let received: serde_json::Value = serde_json::from_str(&next_text(&mut client_read).await).expect("parse message json");
    assert_eq!(received["op"], "message");
    assert_eq!(received["server_channel_id"], server_channel_id);
    assert_eq!(received["data"], payload);
}

#[tokio::test]
async fn unsupported_subprotocol_closes_with_code_1002() {
    let (upstream_url, _upstream_handle) = fake_upstream().await;
    let (ws_url, _layouts_tmp, _data_tmp) = spin_up_bridge(&upstream_url).await;

    let mut request = ws_url.into_client_request().expect("build client request from url");
    request.headers_mut().insert("sec-websocket-protocol", "some.other.protocol".parse().expect("valid header value"));
    let (client, _response) = tokio_tungstenite::connect_async(request).await.expect("connect to bridge websocket");
    let (_write, mut read) = client.split();

    match read.next().await {
        Some(Ok(WsMessage::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1002),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_slug_is_rejected_before_upgrade() {
    let (upstream_url, _upstream_handle) = fake_upstream().await;
    let (ws_url, _layouts_tmp, _data_tmp) = spin_up_bridge(&upstream_url).await;
    let bogus_url = ws_url.replacen(&fgbridge::layouts::slugify(&upstream_url), "nonexistent-slug", 1);

    let mut request = bogus_url.into_client_request().expect("build client request from url");
    request.headers_mut().insert("sec-websocket-protocol", "foxglove.websocket.v1".parse().expect("valid header value"));
    let err = tokio_tungstenite::connect_async(request).await.expect_err("unknown slug is rejected before upgrade");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 404),
        other => panic!("expected an HTTP 404 rejection, got {other:?}"),
    }
}
