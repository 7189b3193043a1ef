//! Channel transport adapters
//!
//! A [`Transport`] wraps whatever delivery primitive connects the two peers
//! behind two operations: fire-and-forget `send` and a single `on_message`
//! subscription. Messages are JSON values (the channel's native unit); the
//! sessions encode and decode envelopes on top.

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryTransport;
#[cfg(feature = "websocket")]
pub use websocket::{JsonFrames, WebSocketChannel};

/// Callback invoked once per inbound message, in delivery order
pub type MessageHandler = Box<dyn FnMut(Value) + Send + 'static>;

/// One endpoint of an unordered, at-least-once-ish message channel
pub trait Transport: Send + Sync + 'static {
    /// Queue a message for the peer. Never blocks and never fails: if no
    /// peer is attached the message is dropped.
    fn send(&self, message: Value);

    /// Install the inbound handler. Only one subscription is allowed per
    /// transport; a second call returns [`Error::AlreadySubscribed`].
    ///
    /// Delivery runs on a spawned Tokio task, so this must be called from
    /// within a Tokio runtime.
    ///
    /// [`Error::AlreadySubscribed`]: crate::error::Error::AlreadySubscribed
    fn on_message(&self, handler: MessageHandler) -> Result<()>;
}
