//! Command payloads carried across the bridge
//!
//! Typed bodies for each [`CommandKind`](crate::envelope::CommandKind) and for
//! ERROR envelopes. The protocol core treats payloads as opaque JSON; these
//! types are what the session APIs build and what host dispatch decodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// UI -> Host: open a URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkParams {
    pub url: Url,
}

/// UI -> Host: app-defined intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentParams {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// UI -> Host: display a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyParams {
    pub message: String,
}

/// UI -> Host: forward a prompt into the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptParams {
    pub prompt: String,
}

/// Either direction: invoke a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Who may invoke a UI-registered tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Exposed to the model through the host's tool registry
    Model,
    /// Only callable from app code
    App,
}

/// UI -> Host: a capability the UI can perform when asked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's parameters
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Vec<Visibility>>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl ToolDescriptor {
    /// Create a descriptor that accepts any object
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
            visibility: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the input schema
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Restrict who may call the tool (omitted means both)
    pub fn with_visibility(mut self, visibility: Vec<Visibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Whether the host should publish the tool to the model
    pub fn visible_to_model(&self) -> bool {
        self.visibility
            .as_ref()
            .map_or(true, |v| v.contains(&Visibility::Model))
    }
}

#[cfg(feature = "mcp")]
impl From<&ToolDescriptor> for rmcp::model::Tool {
    fn from(descriptor: &ToolDescriptor) -> Self {
        let input_schema: std::sync::Arc<serde_json::Map<String, Value>> =
            match descriptor.input_schema.as_object() {
                Some(obj) => std::sync::Arc::new(obj.clone()),
                None => std::sync::Arc::new(serde_json::Map::new()),
            };
        rmcp::model::Tool::new(
            descriptor.name.clone(),
            descriptor.description.clone().unwrap_or_default(),
            input_schema,
        )
    }
}

/// Failure reported by a command handler, sent as an ERROR envelope payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The command payload did not match the command's expected shape
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(message).with_code(codes::INVALID_PARAMS)
    }

    /// No handler for the requested command or tool
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_code(codes::NOT_FOUND)
    }

    /// The peer does not serve this command kind
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(message).with_code(codes::UNSUPPORTED)
    }

    /// The handler crashed before producing an outcome
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message).with_code(codes::INTERNAL)
    }

    /// Interpret an arbitrary ERROR payload.
    ///
    /// Payloads shaped like a `HandlerError` are taken as is. Anything else
    /// becomes the message (strings verbatim, other values as JSON text) and
    /// is kept in `data`.
    pub fn from_payload(payload: Value) -> Self {
        if let Ok(error) = serde_json::from_value::<HandlerError>(payload.clone()) {
            return error;
        }
        match payload {
            Value::Null => Self::new("peer reported an error without details"),
            Value::String(message) => Self::new(message.clone()).with_data(Value::String(message)),
            other => Self::new(other.to_string()).with_data(other),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Result of a command handler
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Error codes produced by the bridge itself
pub mod codes {
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNSUPPORTED: &str = "unsupported";
    pub const INTERNAL: &str = "internal";
}
