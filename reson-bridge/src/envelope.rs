//! Message envelope and request correlation
//!
//! Every message on the channel is one [`Envelope`]. On the wire it is a JSON
//! object with a `kind` tag:
//!
//! ```json
//! { "kind": "command", "requestId": "ui-3f2a...", "command": "tool", "payload": { ... } }
//! ```
//!
//! `init-request` and `init-data` are broadcasts and carry no `requestId`.
//! Every other kind is correlated by a [`RequestId`] minted by the peer that
//! sent the originating command.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::payload::HandlerError;

/// Which side of the channel a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Sandboxed render surface
    Ui,
    /// Embedding process that owns the channel
    Host,
}

impl PeerRole {
    /// Prefix used for request ids minted by this role. The two prefixes
    /// keep the peers' id namespaces disjoint.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            PeerRole::Ui => "ui",
            PeerRole::Host => "host",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Opaque request identifier, allocated by the sender of a command
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Draw a fresh random id in `role`'s namespace.
    ///
    /// Randomness alone is not relied on for uniqueness: the registry checks
    /// each candidate against its live and recently settled ids.
    pub fn random(role: PeerRole) -> Self {
        Self(format!("{}-{}", role.id_prefix(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The fixed set of commands a peer may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    /// Ask the host to open a URL
    Link,
    /// App-defined signal with optional parameters
    Intent,
    /// Fire-and-forget notification; the result is always `null`
    Notify,
    /// Forward a user prompt to the host's conversation
    Prompt,
    /// Invoke a named tool
    Tool,
    /// Announce a tool the UI can perform on request
    RegisterTool,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Link => "link",
            CommandKind::Intent => "intent",
            CommandKind::Notify => "notify",
            CommandKind::Prompt => "prompt",
            CommandKind::Tool => "tool",
            CommandKind::RegisterTool => "registerTool",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit exchanged on the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// UI -> Host: ready to receive render data
    InitRequest,
    /// Host -> UI: render data snapshot (initial or refresh)
    InitData {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    /// A correlated request
    Command {
        request_id: RequestId,
        command: CommandKind,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    /// Receipt confirmation, sent before the command is processed
    Ack { request_id: RequestId },
    /// Successful terminal reply
    Result {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    /// Failed terminal reply. Any payload is accepted, see
    /// [`HandlerError::from_payload`].
    Error {
        request_id: RequestId,
        #[serde(
            default = "unspecified_error",
            deserialize_with = "deserialize_error_payload"
        )]
        payload: HandlerError,
    },
}

fn unspecified_error() -> HandlerError {
    HandlerError::from_payload(Value::Null)
}

fn deserialize_error_payload<'de, D>(deserializer: D) -> std::result::Result<HandlerError, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(HandlerError::from_payload)
}

impl Envelope {
    pub fn command(request_id: RequestId, command: CommandKind, payload: Value) -> Self {
        Envelope::Command {
            request_id,
            command,
            payload,
        }
    }

    /// Tag name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::InitRequest => "init-request",
            Envelope::InitData { .. } => "init-data",
            Envelope::Command { .. } => "command",
            Envelope::Ack { .. } => "ack",
            Envelope::Result { .. } => "result",
            Envelope::Error { .. } => "error",
        }
    }

    /// Correlation id, `None` for broadcasts
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Envelope::InitRequest | Envelope::InitData { .. } => None,
            Envelope::Command { request_id, .. }
            | Envelope::Ack { request_id }
            | Envelope::Result { request_id, .. }
            | Envelope::Error { request_id, .. } => Some(request_id),
        }
    }

    /// Encode into the transport's native unit
    pub fn encode(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Encode as a JSON text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an inbound message.
    ///
    /// Missing `kind`, unknown kinds, a missing `requestId` on correlated
    /// kinds and a missing `command` on commands all yield
    /// [`Error::MalformedEnvelope`].
    pub fn decode(message: Value) -> Result<Self> {
        serde_json::from_value(message).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }

    /// Decode an inbound JSON text frame
    pub fn decode_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}
