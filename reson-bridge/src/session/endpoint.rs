//! Plumbing shared by both peers: envelope I/O, reply correlation and the
//! ACK-then-RESULT responder.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::envelope::{CommandKind, Envelope, PeerRole, RequestId};
use crate::error::{Error, Result};
use crate::payload::{HandlerError, HandlerResult};
use crate::registry::{PendingCommand, PendingRegistry};
use crate::transport::{MessageHandler, Transport};

/// Counts of inbound traffic the protocol layer dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Messages that failed to decode
    pub malformed: u64,
    /// Replies for ids this peer never issued (or no longer remembers)
    pub unmatched: u64,
    /// Replies for ids that already settled
    pub duplicate: u64,
}

pub(crate) struct Endpoint {
    role: PeerRole,
    transport: Arc<dyn Transport>,
    registry: Mutex<PendingRegistry>,
    closed: AtomicBool,
    malformed: AtomicU64,
    unmatched: AtomicU64,
    duplicate: AtomicU64,
}

impl Endpoint {
    pub(crate) fn new(role: PeerRole, transport: Arc<dyn Transport>, config: &SessionConfig) -> Self {
        Self {
            role,
            transport,
            registry: Mutex::new(PendingRegistry::with_history(role, config.settled_history)),
            closed: AtomicBool::new(false),
            malformed: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
        }
    }

    pub(crate) fn role(&self) -> PeerRole {
        self.role
    }

    pub(crate) fn subscribe(&self, handler: MessageHandler) -> Result<()> {
        self.transport.on_message(handler)
    }

    fn registry(&self) -> MutexGuard<'_, PendingRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn send(&self, envelope: &Envelope) {
        send_envelope(self.transport.as_ref(), self.role, envelope);
    }

    /// Decode an inbound message, counting and logging failures
    pub(crate) fn decode(&self, message: Value) -> Option<Envelope> {
        if self.is_closed() {
            return None;
        }
        match Envelope::decode(message) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(role = %self.role, error = %e, "Dropping malformed envelope");
                None
            }
        }
    }

    /// Register a command in the local registry without sending it
    pub(crate) fn register(&self, command: CommandKind) -> Result<PendingCommand> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(self.registry().issue(command))
    }

    /// Register and send a command
    pub(crate) fn issue(&self, command: CommandKind, payload: Value) -> Result<PendingCommand> {
        let pending = self.register(command)?;
        self.send(&Envelope::command(
            pending.request_id.clone(),
            command,
            payload,
        ));
        Ok(pending)
    }

    /// Apply an ACK, RESULT or ERROR to the registry
    pub(crate) fn settle(&self, envelope: Envelope) {
        let outcome = match envelope {
            Envelope::Ack { request_id } => self.registry().acknowledge(&request_id),
            Envelope::Result {
                request_id,
                payload,
            } => self.registry().resolve(&request_id, Ok(payload)),
            Envelope::Error {
                request_id,
                payload,
            } => self
                .registry()
                .resolve(&request_id, Err(Error::HandlerFailure(payload))),
            other => {
                tracing::debug!(role = %self.role, kind = other.kind(), "Ignoring non-reply envelope");
                return;
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e @ Error::DuplicateReply(_)) => {
                self.duplicate.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(role = %self.role, error = %e, "Ignoring duplicate reply");
            }
            Err(e) => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(role = %self.role, error = %e, "Dropping reply");
            }
        }
    }

    /// Acknowledge a command now, then send its outcome once `work` finishes.
    /// A panicking handler is reported as an `internal` ERROR.
    pub(crate) fn respond(&self, request_id: RequestId, work: BoxFuture<'static, HandlerResult>) {
        self.send(&Envelope::Ack {
            request_id: request_id.clone(),
        });

        let transport = self.transport.clone();
        let role = self.role;
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|panic| {
                let reason = panic_reason(panic.as_ref());
                tracing::error!(role = %role, request_id = %request_id, reason, "Handler panicked");
                Err(HandlerError::internal(format!("handler panicked: {}", reason)))
            });

            let reply = match outcome {
                Ok(payload) => Envelope::Result {
                    request_id,
                    payload,
                },
                Err(error) => {
                    tracing::debug!(role = %role, request_id = %request_id, error = %error, "Handler failed");
                    Envelope::Error {
                        request_id,
                        payload: error,
                    }
                }
            };
            send_envelope(transport.as_ref(), role, &reply);
        });
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting traffic and fail everything outstanding
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.registry().close_all()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.registry().len()
    }

    pub(crate) fn is_pending(&self, request_id: &RequestId) -> bool {
        self.registry().contains(request_id)
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            malformed: self.malformed.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(reason) = panic.downcast_ref::<&'static str>() {
        reason
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.as_str()
    } else {
        "unknown panic"
    }
}

fn send_envelope(transport: &dyn Transport, role: PeerRole, envelope: &Envelope) {
    match envelope.encode() {
        Ok(message) => transport.send(message),
        Err(e) => {
            tracing::warn!(role = %role, kind = envelope.kind(), error = %e, "Failed to encode envelope");
        }
    }
}
