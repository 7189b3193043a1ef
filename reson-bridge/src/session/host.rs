//! Host peer session and command dispatch

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::endpoint::{Diagnostics, Endpoint};
use crate::config::SessionConfig;
use crate::envelope::{CommandKind, Envelope, PeerRole, RequestId};
use crate::error::Result;
use crate::payload::{
    HandlerError, HandlerResult, IntentParams, LinkParams, NotifyParams, PromptParams,
    ToolCallParams, ToolDescriptor,
};
use crate::registry::PendingCommand;
use crate::transport::Transport;

/// A decoded UI command, as handed to the [`HostHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    /// Navigate to / open a URL
    Link { url: Url },
    /// App-defined signal
    Intent { intent: String, params: Value },
    /// Show a notification
    Notify { message: String },
    /// Inject a prompt into the conversation
    Prompt { prompt: String },
    /// Invoke a tool the host can reach
    Tool { tool_name: String, params: Value },
    /// The UI exposes a new tool; publish it upstream if appropriate
    RegisterTool(ToolDescriptor),
}

impl HostRequest {
    /// Decode a command payload into its typed request
    pub fn decode(command: CommandKind, payload: Value) -> std::result::Result<Self, HandlerError> {
        Ok(match command {
            CommandKind::Link => {
                let LinkParams { url } = parse::<LinkParams>(command, payload)?;
                HostRequest::Link { url }
            }
            CommandKind::Intent => {
                let IntentParams { intent, params } = parse::<IntentParams>(command, payload)?;
                HostRequest::Intent { intent, params }
            }
            CommandKind::Notify => {
                let NotifyParams { message } = parse::<NotifyParams>(command, payload)?;
                HostRequest::Notify { message }
            }
            CommandKind::Prompt => {
                let PromptParams { prompt } = parse::<PromptParams>(command, payload)?;
                HostRequest::Prompt { prompt }
            }
            CommandKind::Tool => {
                let ToolCallParams { tool_name, params } = parse::<ToolCallParams>(command, payload)?;
                HostRequest::Tool { tool_name, params }
            }
            CommandKind::RegisterTool => HostRequest::RegisterTool(parse::<ToolDescriptor>(command, payload)?),
        })
    }

    pub fn command(&self) -> CommandKind {
        match self {
            HostRequest::Link { .. } => CommandKind::Link,
            HostRequest::Intent { .. } => CommandKind::Intent,
            HostRequest::Notify { .. } => CommandKind::Notify,
            HostRequest::Prompt { .. } => CommandKind::Prompt,
            HostRequest::Tool { .. } => CommandKind::Tool,
            HostRequest::RegisterTool(_) => CommandKind::RegisterTool,
        }
    }
}

fn parse<T: DeserializeOwned>(command: CommandKind, payload: Value) -> std::result::Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::invalid_params(format!("invalid '{}' payload: {}", command, e)))
}

/// Performs the actions the UI asks for
///
/// This is the boundary to the host's own machinery (navigation, tool
/// dispatch, notifications). Each call runs on its own task, so slow work
/// does not hold up the channel. The outcome of a `Notify` is discarded and
/// the UI always receives `null`. A panic is reported to the UI as an
/// `internal` error.
///
/// Closures of the form `Fn(HostRequest) -> BoxFuture<'static, HandlerResult>`
/// implement this trait:
///
/// ```rust
/// use reson_bridge::{HandlerError, HostRequest};
/// use serde_json::json;
///
/// let handler = |request: HostRequest| -> futures::future::BoxFuture<'static, reson_bridge::HandlerResult> {
///     Box::pin(async move {
///         match request {
///             HostRequest::Tool { tool_name, .. } if tool_name == "goodbye" => Ok(json!({"ok": true})),
///             HostRequest::Notify { .. } => Ok(json!(null)),
///             other => Err(HandlerError::unsupported(format!("{:?} not handled", other.command()))),
///         }
///     })
/// };
/// ```
#[async_trait]
pub trait HostHandler: Send + Sync + 'static {
    async fn handle(&self, request: HostRequest) -> HandlerResult;
}

#[async_trait]
impl<F> HostHandler for F
where
    F: Fn(HostRequest) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
{
    async fn handle(&self, request: HostRequest) -> HandlerResult {
        (self)(request).await
    }
}

/// Handle on the host's side of the channel
///
/// Broadcasts the render data once on open, answers every INIT_REQUEST
/// (including repeats after a UI reload) with the latest snapshot, and serves
/// UI commands through a [`HostHandler`]: ACK immediately, then exactly one
/// RESULT or ERROR.
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<HostInner>,
}

struct HostInner {
    endpoint: Endpoint,
    render_data: Mutex<Value>,
    ui_tools: Mutex<BTreeMap<String, ToolDescriptor>>,
    handler: Arc<dyn HostHandler>,
}

impl HostSession {
    /// Attach to `transport` with the initial render data.
    ///
    /// Must be called within a Tokio runtime.
    pub fn open<H: HostHandler>(
        transport: Arc<dyn Transport>,
        render_data: Value,
        handler: H,
    ) -> Result<Self> {
        Self::open_with_config(transport, render_data, handler, SessionConfig::default())
    }

    /// [`open`](Self::open) with explicit configuration
    pub fn open_with_config<H: HostHandler>(
        transport: Arc<dyn Transport>,
        render_data: Value,
        handler: H,
        config: SessionConfig,
    ) -> Result<Self> {
        let inner = Arc::new(HostInner {
            endpoint: Endpoint::new(PeerRole::Host, transport, &config),
            render_data: Mutex::new(render_data),
            ui_tools: Mutex::new(BTreeMap::new()),
            handler: Arc::new(handler),
        });

        let weak = Arc::downgrade(&inner);
        inner.endpoint.subscribe(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        }))?;

        // The UI may have sent its INIT_REQUEST before this side subscribed
        inner.endpoint.send(&Envelope::InitData {
            payload: inner.render_data().clone(),
        });
        tracing::debug!("Host session opened");

        Ok(Self { inner })
    }

    /// Current render data
    pub fn render_data(&self) -> Value {
        self.inner.render_data().clone()
    }

    /// Replace the render data and broadcast it to the UI
    pub fn push_render_data(&self, render_data: Value) {
        let mut current = self.inner.render_data();
        *current = render_data;
        self.inner.endpoint.send(&Envelope::InitData {
            payload: current.clone(),
        });
    }

    /// Tools the UI has registered, ordered by name
    pub fn ui_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.ui_tools().values().cloned().collect()
    }

    /// Ask the UI to run one of the tools it registered
    pub fn call_ui_tool(&self, name: impl Into<String>, params: Value) -> Result<PendingCommand> {
        let payload = serde_json::to_value(ToolCallParams {
            tool_name: name.into(),
            params,
        })?;
        self.inner.endpoint.issue(CommandKind::Tool, payload)
    }

    /// Number of host-issued commands awaiting a terminal reply
    pub fn pending_count(&self) -> usize {
        self.inner.endpoint.pending_count()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.inner.endpoint.is_pending(request_id)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.endpoint.diagnostics()
    }

    /// Stop serving the channel and fail host-issued commands still pending
    pub fn close(&self) {
        let failed = self.inner.endpoint.close();
        tracing::debug!(failed, "Host session closed");
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("role", &self.inner.endpoint.role())
            .field("ui_tools", &self.inner.ui_tools().len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl HostInner {
    fn render_data(&self) -> MutexGuard<'_, Value> {
        self.render_data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ui_tools(&self) -> MutexGuard<'_, BTreeMap<String, ToolDescriptor>> {
        self.ui_tools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_message(&self, message: Value) {
        let Some(envelope) = self.endpoint.decode(message) else {
            return;
        };

        match envelope {
            Envelope::InitRequest => {
                let render_data = self.render_data();
                tracing::debug!("UI requested render data");
                self.endpoint.send(&Envelope::InitData {
                    payload: render_data.clone(),
                });
            }
            Envelope::Command {
                request_id,
                command,
                payload,
            } => self.dispatch(request_id, command, payload),
            Envelope::InitData { .. } => {
                tracing::debug!("Ignoring init-data received by host");
            }
            reply => self.endpoint.settle(reply),
        }
    }

    fn dispatch(&self, request_id: RequestId, command: CommandKind, payload: Value) {
        tracing::debug!(request_id = %request_id, command = %command, "Dispatching UI command");

        let request = match HostRequest::decode(command, payload) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(request_id = %request_id, error = %error, "Rejecting UI command");
                self.endpoint
                    .respond(request_id, Box::pin(future::ready(HandlerResult::Err(error))));
                return;
            }
        };

        if let HostRequest::RegisterTool(descriptor) = &request {
            tracing::debug!(tool = %descriptor.name, "UI registered tool");
            self.ui_tools()
                .insert(descriptor.name.clone(), descriptor.clone());
        }

        let handler = self.handler.clone();
        let work: BoxFuture<'static, HandlerResult> = match request {
            // Fire and forget: the UI only learns that the host received it
            HostRequest::Notify { .. } => Box::pin(async move {
                if let Err(error) = handler.handle(request).await {
                    tracing::debug!(error = %error, "Notify handler failed");
                }
                Ok(Value::Null)
            }),
            request => Box::pin(async move { handler.handle(request).await }),
        };
        self.endpoint.respond(request_id, work);
    }
}
