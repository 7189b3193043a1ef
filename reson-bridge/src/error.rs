//! Error types for reson-bridge

use std::time::Duration;

use thiserror::Error;

use crate::envelope::RequestId;
use crate::payload::HandlerError;

/// Result type alias for reson-bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bridge operations
///
/// Decode and correlation errors (`MalformedEnvelope`, `UnmatchedReply`,
/// `DuplicateReply`) are contained by the session that observes them and
/// only show up in logs. `HandlerFailure` is the one error a command issuer
/// sees from the remote side.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound message could not be decoded into an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Command issued before the render data handshake completed
    #[error("Session not ready: no render data received yet")]
    NotReady,

    /// Reply whose request id has no pending entry
    #[error("Unmatched reply for request {0}")]
    UnmatchedReply(RequestId),

    /// Terminal reply for a request that already settled
    #[error("Duplicate reply for settled request {0}")]
    DuplicateReply(RequestId),

    /// The peer's handler reported a failure
    #[error("Handler failed: {0}")]
    HandlerFailure(HandlerError),

    /// Session was closed while the request was outstanding
    #[error("Session closed")]
    SessionClosed,

    /// Caller-imposed deadline elapsed before the result arrived
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Outgoing command payload failed local validation
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Transport already has an active subscription
    #[error("Transport already has a message handler")]
    AlreadySubscribed,

    /// Transport setup error (connect, accept, handshake)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error stays inside the protocol layer (logged, never
    /// handed to a command issuer).
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Error::MalformedEnvelope(_) | Error::UnmatchedReply(_) | Error::DuplicateReply(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contained_errors() {
        assert!(Error::MalformedEnvelope("x".into()).is_contained());
        assert!(Error::UnmatchedReply(RequestId::from("ui-1")).is_contained());
        assert!(Error::DuplicateReply(RequestId::from("ui-1")).is_contained());
        assert!(!Error::NotReady.is_contained());
        assert!(!Error::HandlerFailure(HandlerError::new("boom")).is_contained());
    }

    #[test]
    fn test_display() {
        let err = Error::UnmatchedReply(RequestId::from("host-abc"));
        assert_eq!(err.to_string(), "Unmatched reply for request host-abc");

        let err = Error::HandlerFailure(HandlerError::new("tool exploded"));
        assert!(err.to_string().contains("tool exploded"));
    }
}
