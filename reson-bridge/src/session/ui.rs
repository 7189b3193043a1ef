//! UI peer session

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use super::endpoint::{Diagnostics, Endpoint};
use crate::config::SessionConfig;
use crate::envelope::{CommandKind, Envelope, PeerRole, RequestId};
use crate::error::{Error, Result};
use crate::handshake::{Gate, Readiness, ReadinessState};
use crate::payload::{
    HandlerError, HandlerResult, IntentParams, LinkParams, NotifyParams, PromptParams,
    ToolCallParams, ToolDescriptor,
};
use crate::registry::PendingCommand;
use crate::transport::Transport;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handle on the embedded UI's side of the channel
///
/// One session exists per UI surface lifetime. The handle is cheap to clone;
/// all clones share the same registry, handshake state and render data.
/// Independent sessions never share state, so tests can run many in
/// parallel.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use reson_bridge::{MemoryTransport, SessionConfig, UiSession};
/// use serde_json::json;
///
/// # async fn example() -> reson_bridge::Result<()> {
/// let (ui_side, _host_side) = MemoryTransport::pair();
/// let ui = UiSession::start(Arc::new(ui_side), SessionConfig::default())?;
///
/// let render_data = ui.ready().await?;
/// println!("rendering {render_data}");
///
/// let call = ui.tool("goodbye", json!({"name": "Ann"}))?;
/// call.ack.await?;
/// let result = call.result.await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UiSession {
    inner: Arc<UiInner>,
}

struct UiInner {
    endpoint: Endpoint,
    readiness: Mutex<Readiness>,
    render_data: watch::Sender<Option<Value>>,
    tools: Mutex<HashMap<String, ToolHandler>>,
}

impl UiSession {
    /// Attach to `transport` and announce readiness with an INIT_REQUEST.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let (render_data, _) = watch::channel(None);
        let inner = Arc::new(UiInner {
            endpoint: Endpoint::new(PeerRole::Ui, transport, &config),
            readiness: Mutex::new(Readiness::new(config.force_wait)),
            render_data,
            tools: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&inner);
        inner.endpoint.subscribe(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        }))?;

        if let Some(init) = inner.readiness().begin() {
            inner.endpoint.send(&init);
        }
        tracing::debug!(force_wait = config.force_wait, "UI session started");

        Ok(Self { inner })
    }

    /// Current handshake state
    pub fn state(&self) -> ReadinessState {
        self.inner.readiness().state()
    }

    /// Latest render data snapshot, `None` before the first INIT_DATA
    pub fn render_data(&self) -> Option<Value> {
        self.inner.render_data.borrow().clone()
    }

    /// Receiver that observes every render data update
    pub fn watch_render_data(&self) -> watch::Receiver<Option<Value>> {
        self.inner.render_data.subscribe()
    }

    /// Wait for the handshake to complete and return the render data
    pub async fn ready(&self) -> Result<Value> {
        let mut rx = self.inner.render_data.subscribe();
        let snapshot = rx
            .wait_for(|data| data.is_some())
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(snapshot.clone().unwrap_or(Value::Null))
    }

    /// Ask the host to open `url`
    pub fn link(&self, url: &str) -> Result<PendingCommand> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidPayload(format!("invalid link url '{}': {}", url, e)))?;
        self.issue(CommandKind::Link, &LinkParams { url })
    }

    /// Send an app-defined intent
    pub fn intent(&self, intent: impl Into<String>, params: Option<Value>) -> Result<PendingCommand> {
        self.issue(
            CommandKind::Intent,
            &IntentParams {
                intent: intent.into(),
                params: params.unwrap_or(Value::Null),
            },
        )
    }

    /// Show a notification on the host. Only the acknowledgment carries
    /// information; the result is always `null`.
    pub fn notify(&self, message: impl Into<String>) -> Result<PendingCommand> {
        self.issue(
            CommandKind::Notify,
            &NotifyParams {
                message: message.into(),
            },
        )
    }

    /// Forward a prompt to the host's conversation
    pub fn prompt(&self, text: impl Into<String>) -> Result<PendingCommand> {
        self.issue(
            CommandKind::Prompt,
            &PromptParams {
                prompt: text.into(),
            },
        )
    }

    /// Invoke a tool through the host
    pub fn tool(&self, name: impl Into<String>, params: Value) -> Result<PendingCommand> {
        self.issue(
            CommandKind::Tool,
            &ToolCallParams {
                tool_name: name.into(),
                params,
            },
        )
    }

    /// Announce a capability the host may later ask this UI to perform.
    /// Pair with [`provide_tool`](Self::provide_tool) to actually serve it.
    pub fn register_tool(&self, descriptor: ToolDescriptor) -> Result<PendingCommand> {
        self.issue(CommandKind::RegisterTool, &descriptor)
    }

    /// Install a local handler for a tool and register it with the host.
    ///
    /// The handler receives the call's `params` and runs on a spawned task.
    /// If the registration cannot be issued the handler is removed again.
    pub fn provide_tool<F>(&self, descriptor: ToolDescriptor, handler: F) -> Result<PendingCommand>
    where
        F: Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        let name = descriptor.name.clone();
        self.inner.tools().insert(name.clone(), Arc::new(handler));

        let issued = self.register_tool(descriptor);
        if issued.is_err() {
            self.inner.tools().remove(&name);
        }
        issued
    }

    /// Number of commands awaiting a terminal reply
    pub fn pending_count(&self) -> usize {
        self.inner.endpoint.pending_count()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.inner.endpoint.is_pending(request_id)
    }

    /// Number of commands held until the handshake completes
    pub fn queued_count(&self) -> usize {
        self.inner.readiness().queued()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.endpoint.diagnostics()
    }

    /// Tear the session down: queued commands are discarded, pending signals
    /// fail with [`Error::SessionClosed`], and later traffic is ignored.
    pub fn close(&self) {
        let discarded = self.inner.readiness().discard_queued();
        let failed = self.inner.endpoint.close();
        tracing::debug!(discarded, failed, "UI session closed");
    }

    fn issue<T: Serialize>(&self, command: CommandKind, params: &T) -> Result<PendingCommand> {
        if self.inner.endpoint.is_closed() {
            return Err(Error::SessionClosed);
        }
        let payload = serde_json::to_value(params)?;

        // Held across send/enqueue so flushes and new sends keep issuance order
        let mut readiness = self.inner.readiness();
        match readiness.gate() {
            Gate::Closed => Err(Error::NotReady),
            Gate::Open => self.inner.endpoint.issue(command, payload),
            Gate::Queue => {
                let pending = self.inner.endpoint.register(command)?;
                readiness.enqueue(Envelope::command(
                    pending.request_id.clone(),
                    command,
                    payload,
                ));
                tracing::debug!(request_id = %pending.request_id, command = %command, "Queued until ready");
                Ok(pending)
            }
        }
    }
}

impl std::fmt::Debug for UiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiSession")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl UiInner {
    fn readiness(&self) -> MutexGuard<'_, Readiness> {
        self.readiness.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tools(&self) -> MutexGuard<'_, HashMap<String, ToolHandler>> {
        self.tools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_message(&self, message: Value) {
        let Some(envelope) = self.endpoint.decode(message) else {
            return;
        };

        match envelope {
            Envelope::InitData { payload } => self.apply_render_data(payload),
            Envelope::Command {
                request_id,
                command,
                payload,
            } => self.dispatch(request_id, command, payload),
            Envelope::InitRequest => {
                tracing::debug!("Ignoring init-request received by UI");
            }
            reply => self.endpoint.settle(reply),
        }
    }

    fn apply_render_data(&self, payload: Value) {
        let mut readiness = self.readiness();
        let Some(applied) = readiness.apply_render_data(payload.clone()) else {
            tracing::debug!("Ignoring render data before startup");
            return;
        };

        self.render_data.send_replace(Some(payload));
        if applied.became_ready {
            tracing::debug!(queued = applied.flush.len(), "Render data received, session ready");
        }
        for envelope in &applied.flush {
            self.endpoint.send(envelope);
        }
    }

    /// Serve a host-issued command. Only tools provided by this UI are
    /// handled; every other command kind is answered with `unsupported`.
    fn dispatch(&self, request_id: RequestId, command: CommandKind, payload: Value) {
        let work: BoxFuture<'static, HandlerResult> = match command {
            CommandKind::Tool => match serde_json::from_value::<ToolCallParams>(payload) {
                Ok(call) => {
                    let handler = self.tools().get(&call.tool_name).cloned();
                    match handler {
                        Some(handler) => handler(call.params),
                        None => Box::pin(future::ready(HandlerResult::Err(HandlerError::not_found(format!(
                            "Tool '{}' is not provided by this UI",
                            call.tool_name
                        ))))),
                    }
                }
                Err(e) => Box::pin(future::ready(HandlerResult::Err(HandlerError::invalid_params(format!(
                    "invalid 'tool' payload: {}",
                    e
                ))))),
            },
            other => Box::pin(future::ready(HandlerResult::Err(HandlerError::unsupported(format!(
                "UI does not handle '{}' commands",
                other
            ))))),
        };

        tracing::debug!(request_id = %request_id, command = %command, "Serving host command");
        self.endpoint.respond(request_id, work);
    }
}
