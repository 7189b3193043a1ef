//! UI and host sessions talking over a real WebSocket connection
#![cfg(feature = "websocket")]

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reson_bridge::{
    Error, HandlerError, HandlerResult, HostRequest, HostSession, ReadinessState, SessionConfig,
    UiSession, WebSocketChannel,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn host_handler(request: HostRequest) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        match request {
            HostRequest::Tool { tool_name, params } if tool_name == "goodbye" => {
                Ok(json!({"ok": true, "to": params["name"]}))
            }
            HostRequest::Notify { .. } => Ok(Value::Null),
            other => Err(HandlerError::unsupported(format!(
                "{} not handled",
                other.command()
            ))),
        }
    })
}

/// Host listens, UI dials in; returns both sessions once the UI is ready
async fn build_bridge(render_data: Value) -> (HostSession, UiSession) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read local addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("Failed to accept");
        let channel = WebSocketChannel::accept(stream)
            .await
            .expect("Server handshake failed");
        HostSession::open(Arc::new(channel), render_data, host_handler)
            .expect("Failed to open host session")
    });

    let channel = WebSocketChannel::connect(&format!("ws://{}", addr))
        .await
        .expect("Failed to connect");
    let host = server.await.expect("Server task panicked");

    let ui = UiSession::start(Arc::new(channel), SessionConfig::default())
        .expect("Failed to start UI session");
    tokio::time::timeout(Duration::from_secs(5), ui.ready())
        .await
        .expect("Timed out waiting for render data")
        .expect("Session closed");

    (host, ui)
}

#[tokio::test]
async fn test_websocket_handshake_and_tool_call() {
    let (_host, ui) = build_bridge(json!({"count": 6})).await;
    assert_eq!(ui.state(), ReadinessState::Ready);
    assert_eq!(ui.render_data(), Some(json!({"count": 6})));

    let call = ui.tool("goodbye", json!({"name": "Ann"})).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), call.acked_then_finish())
        .await
        .expect("Timed out")
        .unwrap();
    assert_eq!(result, json!({"ok": true, "to": "Ann"}));
}

#[tokio::test]
async fn test_websocket_render_data_push() {
    let (host, ui) = build_bridge(json!({"count": 6})).await;
    let mut watch = ui.watch_render_data();

    host.push_render_data(json!({"count": 7}));
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|data| data == &Some(json!({"count": 7}))))
        .await
        .expect("Timed out")
        .unwrap();
}

#[tokio::test]
async fn test_websocket_handler_error() {
    let (_host, ui) = build_bridge(json!({})).await;

    let call = ui.prompt("hello").unwrap();
    match tokio::time::timeout(Duration::from_secs(5), call.finish())
        .await
        .expect("Timed out")
    {
        Err(Error::HandlerFailure(e)) => assert!(e.message.contains("prompt")),
        other => panic!("Expected handler failure, got {other:?}"),
    }
}
