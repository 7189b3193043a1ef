//! # reson-bridge
//!
//! Messaging protocol between an MCP app UI rendered in a sandboxed frame
//! and the host that embeds it.
//!
//! The two sides only share an asynchronous message channel with no request
//! identity and no ordering guarantees across conversations. This crate adds:
//! - **Envelopes**: `init-request`, `init-data`, `command`, `ack`, `result`, `error`
//! - **Correlation**: sender-minted request ids, a per-peer registry of
//!   pending commands, separate ack and result signals
//! - **Handshake**: the UI waits for render data before issuing commands
//!   (reject or queue until ready)
//! - **Commands**: `link`, `intent`, `notify`, `prompt`, `tool`, `registerTool`,
//!   served on the host by a [`HostHandler`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reson_bridge::{HostRequest, HostSession, MemoryTransport, SessionConfig, UiSession};
//! use serde_json::json;
//!
//! # async fn example() -> reson_bridge::Result<()> {
//! let (ui_side, host_side) = MemoryTransport::pair();
//!
//! let _host = HostSession::open(
//!     Arc::new(host_side),
//!     json!({"count": 6}),
//!     |_request: HostRequest| -> futures::future::BoxFuture<'static, reson_bridge::HandlerResult> {
//!         Box::pin(async move { Ok(json!({"ok": true})) })
//!     },
//! )?;
//!
//! let ui = UiSession::start(Arc::new(ui_side), SessionConfig::default())?;
//! assert_eq!(ui.ready().await?, json!({"count": 6}));
//!
//! let result = ui.tool("goodbye", json!({"name": "Ann"}))?.finish().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod payload;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use envelope::{CommandKind, Envelope, PeerRole, RequestId};
pub use error::{Error, Result};
pub use handshake::ReadinessState;
pub use payload::{HandlerError, HandlerResult, ToolDescriptor, Visibility};
pub use registry::{AckSignal, PendingCommand, ResultSignal};
pub use session::{Diagnostics, HostHandler, HostRequest, HostSession, UiSession};
pub use transport::{MemoryTransport, Transport};

#[cfg(feature = "websocket")]
pub use transport::WebSocketChannel;
