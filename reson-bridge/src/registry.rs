//! Request/response registry
//!
//! Each peer owns one [`PendingRegistry`]: a table of commands it has issued
//! and not yet seen a terminal reply for. Every entry carries two independent
//! one-shot signals:
//!
//! - [`AckSignal`] settles when the peer confirms receipt (ACK)
//! - [`ResultSignal`] settles with the outcome (RESULT or ERROR)
//!
//! An entry is removed only when its result settles. The registry never
//! times anything out; embedders that want a deadline race the result signal
//! themselves ([`ResultSignal::with_timeout`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::envelope::{CommandKind, PeerRole, RequestId};
use crate::error::{Error, Result};

/// Number of settled ids remembered for duplicate detection by default
pub const DEFAULT_SETTLED_HISTORY: usize = 1024;

/// Resolves when the peer acknowledges receipt of the command
#[derive(Debug)]
pub struct AckSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for AckSignal {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::SessionClosed))
    }
}

/// Resolves with the command's outcome
#[derive(Debug)]
pub struct ResultSignal {
    rx: oneshot::Receiver<Result<Value>>,
}

impl ResultSignal {
    /// Wait for the result, giving up after `timeout`.
    ///
    /// Giving up does not cancel anything: the pending entry stays in the
    /// registry until the peer answers.
    pub async fn with_timeout(self, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, self)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }
}

impl Future for ResultSignal {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| match r {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::SessionClosed),
        })
    }
}

/// Caller's handle on an issued command
#[derive(Debug)]
pub struct PendingCommand {
    pub request_id: RequestId,
    pub ack: AckSignal,
    pub result: ResultSignal,
}

impl PendingCommand {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Await the outcome, ignoring the acknowledgment
    pub async fn finish(self) -> Result<Value> {
        self.result.await
    }

    /// Await both signals in order and return the outcome
    pub async fn acked_then_finish(self) -> Result<Value> {
        self.ack.await?;
        self.result.await
    }
}

/// Bookkeeping for one in-flight command
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub command: CommandKind,
    pub created_at: Instant,
    ack: Option<oneshot::Sender<()>>,
    result: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    /// Whether an ACK has been seen
    pub fn acknowledged(&self) -> bool {
        self.ack.is_none()
    }
}

/// Bounded memory of recently settled ids
#[derive(Debug)]
struct SettledHistory {
    order: VecDeque<RequestId>,
    ids: HashSet<RequestId>,
    capacity: usize,
}

impl SettledHistory {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: RequestId) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &RequestId) -> bool {
        self.ids.contains(id)
    }
}

/// Table of outstanding requests for one peer
#[derive(Debug)]
pub struct PendingRegistry {
    role: PeerRole,
    pending: HashMap<RequestId, PendingRequest>,
    settled: SettledHistory,
}

impl PendingRegistry {
    pub fn new(role: PeerRole) -> Self {
        Self::with_history(role, DEFAULT_SETTLED_HISTORY)
    }

    /// Create a registry that remembers `settled_history` settled ids for
    /// duplicate detection
    pub fn with_history(role: PeerRole, settled_history: usize) -> Self {
        Self {
            role,
            pending: HashMap::new(),
            settled: SettledHistory::new(settled_history),
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Mint an id that is neither pending nor recently settled
    fn mint(&self) -> RequestId {
        loop {
            let id = RequestId::random(self.role);
            if !self.pending.contains_key(&id) && !self.settled.contains(&id) {
                return id;
            }
        }
    }

    /// Register a new command and return the caller's handle on it
    pub fn issue(&mut self, command: CommandKind) -> PendingCommand {
        let request_id = self.mint();
        let (ack_tx, ack_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                request_id: request_id.clone(),
                command,
                created_at: Instant::now(),
                ack: Some(ack_tx),
                result: result_tx,
            },
        );

        PendingCommand {
            request_id,
            ack: AckSignal { rx: ack_rx },
            result: ResultSignal { rx: result_rx },
        }
    }

    /// Settle the ack signal for `request_id`. Repeated ACKs are ignored.
    pub fn acknowledge(&mut self, request_id: &RequestId) -> Result<()> {
        match self.pending.get_mut(request_id) {
            Some(entry) => {
                if let Some(tx) = entry.ack.take() {
                    let _ = tx.send(());
                } else {
                    tracing::debug!(request_id = %request_id, "Repeated ack ignored");
                }
                Ok(())
            }
            None if self.settled.contains(request_id) => {
                Err(Error::DuplicateReply(request_id.clone()))
            }
            None => Err(Error::UnmatchedReply(request_id.clone())),
        }
    }

    /// Settle the result signal and remove the entry.
    ///
    /// If no ACK was seen the ack signal settles too: a terminal reply
    /// implies receipt.
    pub fn resolve(&mut self, request_id: &RequestId, outcome: Result<Value>) -> Result<()> {
        let Some(mut entry) = self.pending.remove(request_id) else {
            return if self.settled.contains(request_id) {
                Err(Error::DuplicateReply(request_id.clone()))
            } else {
                Err(Error::UnmatchedReply(request_id.clone()))
            };
        };

        if let Some(tx) = entry.ack.take() {
            let _ = tx.send(());
        }
        if entry.result.send(outcome).is_err() {
            tracing::debug!(request_id = %request_id, "Result receiver dropped before settlement");
        }
        self.settled.insert(entry.request_id);
        Ok(())
    }

    /// Fail every pending entry with [`Error::SessionClosed`]. Returns how
    /// many were outstanding.
    pub fn close_all(&mut self) -> usize {
        let count = self.pending.len();
        for (request_id, entry) in self.pending.drain() {
            let _ = entry.result.send(Err(Error::SessionClosed));
            self.settled.insert(request_id);
        }
        count
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn get(&self, request_id: &RequestId) -> Option<&PendingRequest> {
        self.pending.get(request_id)
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::HandlerError;
    use serde_json::json;

    #[tokio::test]
    async fn test_issue_then_ack_then_result() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Tool);
        let id = pending.request_id.clone();
        assert!(registry.contains(&id));
        assert!(!registry.get(&id).unwrap().acknowledged());

        registry.acknowledge(&id).unwrap();
        assert!(registry.get(&id).unwrap().acknowledged());
        assert!(registry.contains(&id));
        pending.ack.await.unwrap();

        registry.resolve(&id, Ok(json!({"ok": true}))).unwrap();
        assert!(!registry.contains(&id));
        assert_eq!(pending.result.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_result_without_ack_settles_both() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Notify);
        let id = pending.request_id.clone();

        registry.resolve(&id, Ok(Value::Null)).unwrap();
        pending.ack.await.unwrap();
        assert_eq!(pending.result.await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_error_outcome() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Tool);
        let id = pending.request_id.clone();

        registry
            .resolve(&id, Err(Error::HandlerFailure(HandlerError::new("boom"))))
            .unwrap();
        match pending.result.await {
            Err(Error::HandlerFailure(e)) => assert_eq!(e.message, "boom"),
            other => panic!("expected handler failure, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_result_is_ignored() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Tool);
        let id = pending.request_id.clone();

        registry.resolve(&id, Ok(json!(1))).unwrap();
        let err = registry.resolve(&id, Ok(json!(2))).unwrap_err();
        assert!(matches!(err, Error::DuplicateReply(_)));
        let err = registry.acknowledge(&id).unwrap_err();
        assert!(matches!(err, Error::DuplicateReply(_)));

        assert_eq!(pending.result.await.unwrap(), json!(1));
    }

    #[test]
    fn test_unknown_id_touches_nothing() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Tool);
        let stranger = RequestId::from("ui-stale");

        assert!(matches!(
            registry.acknowledge(&stranger),
            Err(Error::UnmatchedReply(_))
        ));
        assert!(matches!(
            registry.resolve(&stranger, Ok(json!(null))),
            Err(Error::UnmatchedReply(_))
        ));

        assert_eq!(registry.len(), 1);
        let entry = registry.get(&pending.request_id).unwrap();
        assert!(!entry.acknowledged());
    }

    #[tokio::test]
    async fn test_out_of_order_results() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let a = registry.issue(CommandKind::Tool);
        let b = registry.issue(CommandKind::Tool);

        registry.resolve(&b.request_id, Ok(json!("b"))).unwrap();
        assert!(registry.contains(&a.request_id));
        registry.resolve(&a.request_id, Ok(json!("a"))).unwrap();

        assert_eq!(a.result.await.unwrap(), json!("a"));
        assert_eq!(b.result.await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_close_all_fails_pending() {
        let mut registry = PendingRegistry::new(PeerRole::Host);
        let a = registry.issue(CommandKind::Tool);
        let b = registry.issue(CommandKind::Intent);

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(matches!(a.ack.await, Err(Error::SessionClosed)));
        assert!(matches!(b.result.await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_entry() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let pending = registry.issue(CommandKind::Tool);
        let id = pending.request_id.clone();

        let err = pending
            .result
            .with_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(registry.contains(&id));

        // A late answer still settles cleanly
        registry.resolve(&id, Ok(json!(true))).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_minted_ids_are_unique() {
        let mut registry = PendingRegistry::new(PeerRole::Ui);
        let ids: HashSet<RequestId> = (0..500)
            .map(|_| registry.issue(CommandKind::Notify).request_id)
            .collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(registry.len(), 500);
        assert!(ids.iter().all(|id| id.as_str().starts_with("ui-")));
    }

    #[test]
    fn test_settled_history_is_bounded() {
        let mut history = SettledHistory::new(2);
        history.insert(RequestId::from("a"));
        history.insert(RequestId::from("b"));
        history.insert(RequestId::from("c"));
        assert!(!history.contains(&RequestId::from("a")));
        assert!(history.contains(&RequestId::from("b")));
        assert!(history.contains(&RequestId::from("c")));
    }
}
