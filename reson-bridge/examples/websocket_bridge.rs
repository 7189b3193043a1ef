//! Host and UI over a WebSocket
//!
//! Runs both peers in one process: the host accepts a connection on
//! 127.0.0.1:9091 and the UI dials in, waits for its render data, registers a
//! tool of its own and calls one of the host's.
//!
//! ```
//! RUST_LOG=reson_bridge=debug cargo run --example websocket_bridge
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use reson_bridge::{
    HandlerError, HandlerResult, HostRequest, HostSession, SessionConfig, ToolDescriptor,
    UiSession, WebSocketChannel,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn handle(request: HostRequest) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        match request {
            HostRequest::Tool { tool_name, params } if tool_name == "goodbye" => {
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("world");
                eprintln!("[host] goodbye, {}", name);
                Ok(json!({"ok": true}))
            }
            HostRequest::Notify { message } => {
                eprintln!("[host] notification: {}", message);
                Ok(Value::Null)
            }
            HostRequest::RegisterTool(tool) => {
                eprintln!("[host] UI registered '{}'", tool.name);
                Ok(json!({"registered": tool.name}))
            }
            other => Err(HandlerError::unsupported(format!(
                "'{}' is not handled by this host",
                other.command()
            ))),
        }
    })
}

#[tokio::main]
async fn main() -> reson_bridge::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:9091")
        .await
        .map_err(|e| reson_bridge::Error::Transport(e.to_string()))?;
    eprintln!("Host listening on ws://127.0.0.1:9091");

    let host_task = tokio::spawn(async move {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| reson_bridge::Error::Transport(e.to_string()))?;
        eprintln!("[host] connection from {}", peer);
        let channel = WebSocketChannel::accept(stream).await?;
        HostSession::open(Arc::new(channel), json!({"count": 6}), handle)
    });

    let channel = WebSocketChannel::connect("ws://127.0.0.1:9091").await?;
    let ui = UiSession::start(
        Arc::new(channel),
        SessionConfig::default().with_force_wait(true),
    )?;

    let host = host_task
        .await
        .map_err(|e| reson_bridge::Error::Transport(e.to_string()))??;

    let render_data = ui.ready().await?;
    eprintln!("[ui] ready with {}", render_data);

    let call = ui.tool("goodbye", json!({"name": "Ann"}))?;
    call.ack.await?;
    eprintln!("[ui] host acknowledged {}", call.request_id);
    eprintln!("[ui] result: {}", call.result.await?);

    ui.provide_tool(
        ToolDescriptor::new("zoom").with_description("Zoom the chart"),
        |params: Value| -> BoxFuture<'static, HandlerResult> {
            Box::pin(async move {
                let level = params.get("level").and_then(|v| v.as_f64()).unwrap_or(1.0);
                Ok(json!({"level": level * 2.0}))
            })
        },
    )?
    .finish()
    .await?;

    let zoomed = host.call_ui_tool("zoom", json!({"level": 1.5}))?.finish().await?;
    eprintln!("[host] UI tool answered {}", zoomed);

    ui.notify("bye")?.finish().await?;

    ui.close();
    host.close();
    Ok(())
}
