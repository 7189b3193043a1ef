//! In-process transport
//!
//! Two connected endpoints backed by unbounded `tokio::sync::mpsc` channels.
//! Behaves like a window message channel: a message sent before the other
//! side subscribes is lost, and each side sees its inbound messages in the
//! order they were sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{MessageHandler, Transport};
use crate::error::{Error, Result};

type Inbox = Arc<Mutex<Option<mpsc::UnboundedSender<Value>>>>;

/// One end of an in-process channel
pub struct MemoryTransport {
    /// Where this endpoint's subscriber receives messages
    inbox: Inbox,
    /// The other endpoint's inbox
    peer_inbox: Inbox,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryTransport {
    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let left: Inbox = Arc::new(Mutex::new(None));
        let right: Inbox = Arc::new(Mutex::new(None));
        (
            Self::new(left.clone(), right.clone()),
            Self::new(right, left),
        )
    }

    fn new(inbox: Inbox, peer_inbox: Inbox) -> Self {
        Self {
            inbox,
            peer_inbox,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of `send` calls made on this endpoint
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Number of sends that found no attached peer
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the other endpoint has a live subscription
    pub fn peer_attached(&self) -> bool {
        self.peer_inbox
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: Value) {
        self.sent.fetch_add(1, Ordering::Relaxed);

        let delivered = match self.peer_inbox.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|tx| tx.send(message).is_ok()),
            Err(_) => false,
        };

        if !delivered {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Peer not attached, message dropped");
        }
    }

    fn on_message(&self, mut handler: MessageHandler) -> Result<()> {
        let mut rx = {
            let mut slot = self
                .inbox
                .lock()
                .map_err(|_| Error::Transport("memory inbox lock poisoned".to_string()))?;
            if slot.is_some() {
                return Err(Error::AlreadySubscribed);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *slot = Some(tx);
            rx
        };

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("sent", &self.sent_count())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
