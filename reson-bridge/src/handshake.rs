//! Readiness handshake for the UI peer
//!
//! ```text
//! Uninitialized --begin()--> AwaitingData --first INIT_DATA--> Ready
//! ```
//!
//! The machine is linear: no regression and no cycles. `begin` emits the
//! INIT_REQUEST broadcast and moves on without waiting for any reply. Until
//! the first render data arrives, outbound commands are either queued
//! (force-wait) or refused with [`Error::NotReady`](crate::Error::NotReady).

use std::collections::VecDeque;

use serde_json::Value;

use crate::envelope::Envelope;

/// Where the UI peer is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Startup signal not sent yet
    Uninitialized,
    /// INIT_REQUEST sent, waiting for the first INIT_DATA
    AwaitingData,
    /// Render data received; terminal
    Ready,
}

/// What to do with a command issued right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Send immediately
    Open,
    /// Hold until ready (force-wait)
    Queue,
    /// Refuse with `NotReady`
    Closed,
}

/// Outcome of applying an INIT_DATA payload
#[derive(Debug, Default)]
pub struct RenderDataApplied {
    /// This payload completed the handshake
    pub became_ready: bool,
    /// Queued commands to send now, in issuance order
    pub flush: Vec<Envelope>,
}

/// Handshake state plus the render data snapshot and the force-wait queue
#[derive(Debug)]
pub struct Readiness {
    state: ReadinessState,
    force_wait: bool,
    snapshot: Option<Value>,
    queue: VecDeque<Envelope>,
}

impl Readiness {
    pub fn new(force_wait: bool) -> Self {
        Self {
            state: ReadinessState::Uninitialized,
            force_wait,
            snapshot: None,
            queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }

    pub fn force_wait(&self) -> bool {
        self.force_wait
    }

    /// Latest render data, overwritten by each INIT_DATA
    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    /// Number of commands held for the handshake
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Leave `Uninitialized`, returning the INIT_REQUEST to broadcast.
    /// Later calls return `None`.
    pub fn begin(&mut self) -> Option<Envelope> {
        if self.state != ReadinessState::Uninitialized {
            return None;
        }
        self.state = ReadinessState::AwaitingData;
        Some(Envelope::InitRequest)
    }

    /// Decide how a command issued now is handled
    pub fn gate(&self) -> Gate {
        match (self.state, self.force_wait) {
            (ReadinessState::Ready, _) => Gate::Open,
            (_, true) => Gate::Queue,
            (_, false) => Gate::Closed,
        }
    }

    /// Hold a command until the handshake completes. Only meaningful when
    /// [`gate`](Self::gate) returned [`Gate::Queue`].
    pub fn enqueue(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
    }

    /// Drop everything still queued, returning how many commands were held
    pub fn discard_queued(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    /// Apply an INIT_DATA payload.
    ///
    /// Returns `None` when the payload is ignored (the startup signal has not
    /// been sent). Otherwise the snapshot is replaced, and on the first
    /// payload the state becomes `Ready` and the queue is drained.
    pub fn apply_render_data(&mut self, payload: Value) -> Option<RenderDataApplied> {
        match self.state {
            ReadinessState::Uninitialized => None,
            ReadinessState::AwaitingData => {
                self.snapshot = Some(payload);
                self.state = ReadinessState::Ready;
                Some(RenderDataApplied {
                    became_ready: true,
                    flush: self.queue.drain(..).collect(),
                })
            }
            ReadinessState::Ready => {
                self.snapshot = Some(payload);
                Some(RenderDataApplied::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CommandKind, RequestId};
    use serde_json::json;

    fn command(id: &str) -> Envelope {
        Envelope::command(RequestId::from(id), CommandKind::Tool, Value::Null)
    }

    #[test]
    fn test_linear_transitions() {
        let mut readiness = Readiness::new(false);
        assert_eq!(readiness.state(), ReadinessState::Uninitialized);

        assert_eq!(readiness.begin(), Some(Envelope::InitRequest));
        assert_eq!(readiness.state(), ReadinessState::AwaitingData);
        assert_eq!(readiness.begin(), None);

        let applied = readiness.apply_render_data(json!({"count": 6})).unwrap();
        assert!(applied.became_ready);
        assert_eq!(readiness.state(), ReadinessState::Ready);
        assert_eq!(readiness.snapshot(), Some(&json!({"count": 6})));
        assert_eq!(readiness.begin(), None);
    }

    #[test]
    fn test_render_data_before_begin_is_ignored() {
        let mut readiness = Readiness::new(false);
        assert!(readiness.apply_render_data(json!(1)).is_none());
        assert_eq!(readiness.state(), ReadinessState::Uninitialized);
        assert!(readiness.snapshot().is_none());
    }

    #[test]
    fn test_refresh_overwrites_without_transition() {
        let mut readiness = Readiness::new(false);
        readiness.begin();
        readiness.apply_render_data(json!({"a": 1, "b": 2}));

        let applied = readiness.apply_render_data(json!({"a": 3})).unwrap();
        assert!(!applied.became_ready);
        assert!(applied.flush.is_empty());
        // Overwrite, not merge
        assert_eq!(readiness.snapshot(), Some(&json!({"a": 3})));
        assert!(readiness.is_ready());
    }

    #[test]
    fn test_gate_without_force_wait() {
        let mut readiness = Readiness::new(false);
        assert_eq!(readiness.gate(), Gate::Closed);
        readiness.begin();
        assert_eq!(readiness.gate(), Gate::Closed);
        readiness.apply_render_data(Value::Null);
        assert_eq!(readiness.gate(), Gate::Open);
    }

    #[test]
    fn test_force_wait_flushes_in_order_once() {
        let mut readiness = Readiness::new(true);
        assert_eq!(readiness.gate(), Gate::Queue);
        readiness.enqueue(command("ui-a"));
        readiness.begin();
        readiness.enqueue(command("ui-b"));
        readiness.enqueue(command("ui-c"));
        assert_eq!(readiness.queued(), 3);

        let applied = readiness.apply_render_data(json!({})).unwrap();
        let ids: Vec<_> = applied
            .flush
            .iter()
            .filter_map(|e| e.request_id().map(|id| id.as_str().to_string()))
            .collect();
        assert_eq!(ids, vec!["ui-a", "ui-b", "ui-c"]);
        assert_eq!(readiness.queued(), 0);

        let again = readiness.apply_render_data(json!({})).unwrap();
        assert!(again.flush.is_empty());
        assert_eq!(readiness.gate(), Gate::Open);
    }
}
