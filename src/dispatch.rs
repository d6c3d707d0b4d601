//! Tool Invocation Dispatcher.
//!
//! Turns a `(session, action, payload)` triple into a blocking remote call
//! against whichever browser connection currently serves the session. Each
//! call is tracked in a correlation-id keyed table of pending completions
//! that is populated *before* the frame is sent, so a fast reply can never
//! race ahead of its registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::protocol::{
    CorrelationId, ServerFrame, ToolAction, ToolCallResult, NOT_CONNECTED_ERROR,
};
use crate::session::{ConnectionId, SessionRegistry};

/// Deadline applied when the caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{}", NOT_CONNECTED_ERROR)]
    NotConnected,
    #[error("tool call timed out after {}", format_duration(*.0))]
    Timeout(Duration),
    #[error("client disconnected")]
    Disconnected,
    #[error("failed to send tool call to client")]
    SendFailed,
    #[error("invalid session id: {0}")]
    InvalidSession(String),
    #[error("timeout must be greater than zero")]
    InvalidTimeout,
}

impl DispatchError {
    /// Render the error as the failure result handed back to tool callers.
    pub fn into_result(self) -> ToolCallResult {
        ToolCallResult::failure(self.to_string())
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// One in-flight invocation awaiting its `tool_result`.
struct PendingCall {
    action: ToolAction,
    payload: Value,
    created_at: Instant,
    connection: ConnectionId,
    slot: oneshot::Sender<ToolCallResult>,
}

/// Read-only view of a pending call, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub correlation: CorrelationId,
    pub action: ToolAction,
    pub connection: ConnectionId,
    pub payload: Value,
    pub age_ms: u64,
}

struct DispatcherInner {
    registry: SessionRegistry,
    pending: Mutex<HashMap<CorrelationId, PendingCall>>,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    default_timeout: Duration,
}

/// Routes tool calls to browser connections and awaits their replies.
///
/// Cheap to clone; all clones share one pending table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry) -> Self {
        Self::with_timeout(registry, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(registry: SessionRegistry, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                pending: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                default_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Invoke `action` on the browser serving `session_id`.
    ///
    /// Never fails: every error is folded into a failure [`ToolCallResult`].
    pub async fn invoke(
        &self,
        session_id: &str,
        action: ToolAction,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ToolCallResult {
        match self.try_invoke(session_id, action, payload, timeout).await {
            Ok(result) => result,
            Err(err) => err.into_result(),
        }
    }

    /// Invoke `action` on the browser serving `session_id`, keeping the
    /// failure kind distinguishable.
    ///
    /// Calls for the same session are serialized: a second call waits for
    /// the first to resolve, and that wait counts against its own deadline.
    pub async fn try_invoke(
        &self,
        session_id: &str,
        action: ToolAction,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, DispatchError> {
        if session_id.is_empty() {
            return Err(DispatchError::InvalidSession("session id is empty".into()));
        }
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        if timeout.is_zero() {
            return Err(DispatchError::InvalidTimeout);
        }

        // Fast path: an unknown session never waits on the gate.
        if self.inner.registry.lookup(session_id).is_none() {
            tracing::debug!(session = %session_id, %action, "tool call for unconnected session");
            return Err(DispatchError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        let mut gate = SessionGate::new(&self.inner, session_id);
        if tokio::time::timeout_at(deadline, gate.acquire()).await.is_err() {
            tracing::warn!(session = %session_id, %action, "timed out waiting for previous tool call");
            return Err(DispatchError::Timeout(timeout));
        }

        // The mapping may have moved while we waited.
        let connection = self
            .inner
            .registry
            .lookup(session_id)
            .ok_or(DispatchError::NotConnected)?;

        let correlation = CorrelationId::generate();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            correlation.clone(),
            PendingCall {
                action,
                payload: payload.clone(),
                created_at: Instant::now(),
                connection: connection.id(),
                slot: tx,
            },
        );
        let _pending = PendingGuard {
            inner: &self.inner,
            correlation: correlation.clone(),
        };

        tracing::debug!(
            session = %session_id,
            connection = %connection.id(),
            correlation = %correlation,
            %action,
            "sending tool call"
        );

        let frame = ServerFrame::Invoke {
            id: correlation.clone(),
            action,
            payload,
        };
        match tokio::time::timeout_at(deadline, connection.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(session = %session_id, correlation = %correlation, error = %err, "tool call send failed");
                return Err(DispatchError::SendFailed);
            }
            Err(_) => {
                tracing::warn!(session = %session_id, correlation = %correlation, "outbound queue full until deadline");
                return Err(DispatchError::Timeout(timeout));
            }
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| DispatchError::Disconnected),
            _ = connection.closed() => Err(DispatchError::Disconnected),
            _ = tokio::time::sleep_until(deadline) => Err(DispatchError::Timeout(timeout)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => tracing::debug!(
                session = %session_id,
                correlation = %correlation,
                success = result.success,
                elapsed_ms,
                "tool call resolved"
            ),
            Err(DispatchError::Timeout(_)) => tracing::warn!(
                session = %session_id,
                correlation = %correlation,
                %action,
                elapsed_ms,
                "tool call timed out"
            ),
            Err(err) => tracing::info!(
                session = %session_id,
                correlation = %correlation,
                error = %err,
                elapsed_ms,
                "tool call failed"
            ),
        }
        outcome
    }

    /// Deliver a `tool_result` received on connection `from`.
    ///
    /// Returns `false` when the reply was discarded: unknown correlation id
    /// (late, duplicate, or never issued), a reply from a connection other
    /// than the one the call was sent to, or a caller that already gave up.
    pub fn resolve(
        &self,
        from: ConnectionId,
        correlation: &CorrelationId,
        result: ToolCallResult,
    ) -> bool {
        let mut pending = self.inner.pending.lock();
        let Some(owner) = pending.get(correlation).map(|call| call.connection) else {
            tracing::debug!(%correlation, connection = %from, "discarding tool result with no pending call");
            return false;
        };
        if owner != from {
            tracing::warn!(
                %correlation,
                connection = %from,
                expected = %owner,
                "discarding tool result from foreign connection"
            );
            return false;
        }
        let Some(call) = pending.remove(correlation) else {
            return false;
        };
        drop(pending);

        tracing::debug!(
            %correlation,
            action = %call.action,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "tool result received"
        );
        call.slot.send(result).is_ok()
    }

    /// Fail every call pending on `connection` as disconnected.
    ///
    /// Returns the number of calls that were abandoned.
    pub fn abandon_connection(&self, connection: ConnectionId) -> usize {
        let mut abandoned = Vec::new();
        self.inner.pending.lock().retain(|correlation, call| {
            if call.connection == connection {
                abandoned.push((correlation.clone(), call.action));
                false
            } else {
                true
            }
        });
        for (correlation, action) in &abandoned {
            tracing::info!(%connection, %correlation, %action, "abandoning pending tool call");
        }
        abandoned.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pending_snapshot(&self) -> Vec<PendingSummary> {
        let pending = self.inner.pending.lock();
        pending
            .iter()
            .map(|(correlation, call)| PendingSummary {
                correlation: correlation.clone(),
                action: call.action,
                connection: call.connection,
                payload: call.payload.clone(),
                age_ms: call.created_at.elapsed().as_millis() as u64,
            })
            .collect()
    }
}

/// Removes a pending entry when its invocation finishes, however it ends.
struct PendingGuard<'a> {
    inner: &'a DispatcherInner,
    correlation: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.correlation);
    }
}

/// Per-session serialization of tool calls.
///
/// Holds a reference to the session's gate mutex while waiting and while
/// the call runs. The gate is removed from the table once no other caller
/// references it.
struct SessionGate<'a> {
    inner: &'a DispatcherInner,
    session: String,
    gate: Arc<AsyncMutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<'a> SessionGate<'a> {
    fn new(inner: &'a DispatcherInner, session: &str) -> Self {
        let gate = inner
            .gates
            .lock()
            .entry(session.to_string())
            .or_default()
            .clone();
        Self {
            inner,
            session: session.to_string(),
            gate,
            permit: None,
        }
    }

    async fn acquire(&mut self) {
        let permit = self.gate.clone().lock_owned().await;
        self.permit = Some(permit);
    }
}

impl Drop for SessionGate<'_> {
    fn drop(&mut self) {
        self.permit.take();
        let mut gates = self.inner.gates.lock();
        let unused = gates
            .get(&self.session)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2);
        if unused {
            gates.remove(&self.session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Connection;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Dispatcher, SessionRegistry) {
        let registry = SessionRegistry::new();
        (Dispatcher::new(registry.clone()), registry)
    }

    fn connect(registry: &SessionRegistry, session: &str) -> (Connection, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = Connection::new(tx);
        registry.register(session, connection.clone());
        (connection, rx)
    }

    /// Answer every invocation on `rx` with the result produced by `reply`.
    fn spawn_responder<F>(
        dispatcher: &Dispatcher,
        connection: &Connection,
        mut rx: mpsc::Receiver<ServerFrame>,
        delay: Duration,
        reply: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(ToolAction, &Value) -> ToolCallResult + Send + 'static,
    {
        let dispatcher = dispatcher.clone();
        let id = connection.id();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let ServerFrame::Invoke {
                    id: correlation,
                    action,
                    payload,
                } = frame
                {
                    tokio::time::sleep(delay).await;
                    dispatcher.resolve(id, &correlation, reply(action, &payload));
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn correlated_response_resolves_call() {
        let (dispatcher, registry) = setup();
        let (c1, rx) = connect(&registry, "s1");
        spawn_responder(&dispatcher, &c1, rx, Duration::from_millis(500), |_, _| {
            ToolCallResult::ok().with_element_id("e1")
        });

        let result = dispatcher
            .invoke(
                "s1",
                ToolAction::AddElement,
                json!({"type": "rectangle", "x": 0, "y": 0, "width": 10, "height": 10}),
                Some(Duration::from_secs(30)),
            )
            .await;

        assert_eq!(result, ToolCallResult::ok().with_element_id("e1"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unconnected_session_fails_immediately() {
        let (dispatcher, _registry) = setup();
        let started = Instant::now();

        let result = dispatcher
            .invoke("s2", ToolAction::ClearCanvas, Value::Null, None)
            .await;

        assert_eq!(result, ToolCallResult::failure("client not connected"));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let (dispatcher, registry) = setup();
        let (_c3, _rx) = connect(&registry, "s3");
        let started = Instant::now();

        let err = dispatcher
            .try_invoke(
                "s3",
                ToolAction::AddElement,
                json!({}),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::Timeout(Duration::from_millis(100)));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_is_discarded() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");

        let result = dispatcher
            .invoke("s1", ToolAction::ClearCanvas, Value::Null, Some(Duration::from_millis(50)))
            .await;
        assert!(!result.success);

        let Some(ServerFrame::Invoke { id, .. }) = rx.recv().await else {
            panic!("expected invoke frame");
        };
        assert!(!dispatcher.resolve(c1.id(), &id, ToolCallResult::ok()));

        // A fired timeout leaves the session usable.
        spawn_responder(&dispatcher, &c1, rx, Duration::ZERO, |_, _| ToolCallResult::ok());
        let result = dispatcher
            .invoke("s1", ToolAction::ClearCanvas, Value::Null, None)
            .await;
        assert!(result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_response_resolves_once() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");

        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .invoke("s1", ToolAction::AddElement, json!({}), None)
                    .await
            }
        });

        let Some(ServerFrame::Invoke { id, .. }) = rx.recv().await else {
            panic!("expected invoke frame");
        };
        assert!(dispatcher.resolve(c1.id(), &id, ToolCallResult::ok().with_element_id("first")));
        assert!(!dispatcher.resolve(c1.id(), &id, ToolCallResult::ok().with_element_id("second")));

        let result = call.await.unwrap();
        assert_eq!(result.element_id.as_deref(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_from_other_connection_is_ignored() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");
        let (other, _other_rx) = connect(&registry, "other");

        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .invoke("s1", ToolAction::GetCanvasState, Value::Null, None)
                    .await
            }
        });

        let Some(ServerFrame::Invoke { id, .. }) = rx.recv().await else {
            panic!("expected invoke frame");
        };
        assert!(!dispatcher.resolve(other.id(), &id, ToolCallResult::failure("spoofed")));
        assert!(dispatcher.resolve(c1.id(), &id, ToolCallResult::ok()));
        assert!(call.await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_resolves_as_disconnected() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");

        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, None)
                    .await
            }
        });

        assert!(rx.recv().await.is_some());
        c1.close();
        registry.unregister(c1.id());

        assert_eq!(call.await.unwrap(), Err(DispatchError::Disconnected));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_connection_fails_pending_calls() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");

        let call = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, None)
                    .await
            }
        });

        assert!(rx.recv().await.is_some());
        assert_eq!(dispatcher.pending_snapshot().len(), 1);
        assert_eq!(dispatcher.abandon_connection(c1.id()), 1);
        assert_eq!(call.await.unwrap(), Err(DispatchError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_is_send_failure() {
        let (dispatcher, registry) = setup();
        let (_c1, rx) = connect(&registry, "s1");
        drop(rx);

        let err = dispatcher
            .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::SendFailed);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_in_one_session_are_serialized() {
        let (dispatcher, registry) = setup();
        let (c1, mut rx) = connect(&registry, "s1");

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .invoke("s1", ToolAction::AddElement, json!({"n": 1}), None)
                    .await
            }
        });
        let Some(ServerFrame::Invoke { id: first_id, .. }) = rx.recv().await else {
            panic!("expected invoke frame");
        };

        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .invoke("s1", ToolAction::AddElement, json!({"n": 2}), None)
                    .await
            }
        });

        // The second call must not be sent while the first is unresolved.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.pending_count(), 1);

        dispatcher.resolve(c1.id(), &first_id, ToolCallResult::ok());
        assert!(first.await.unwrap().success);

        let Some(ServerFrame::Invoke { id: second_id, payload, .. }) = rx.recv().await else {
            panic!("expected invoke frame");
        };
        assert_eq!(payload, json!({"n": 2}));
        dispatcher.resolve(c1.id(), &second_id, ToolCallResult::ok());
        assert!(second.await.unwrap().success);
        assert!(dispatcher.inner.gates.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_wait_counts_against_deadline() {
        let (dispatcher, registry) = setup();
        let (_c1, _rx) = connect(&registry, "s1");

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, Some(Duration::from_secs(10)))
                    .await
            }
        });
        tokio::task::yield_now().await;

        let started = Instant::now();
        let err = dispatcher
            .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Timeout(Duration::from_secs(1)));
        assert_eq!(started.elapsed(), Duration::from_secs(1));

        assert!(matches!(first.await.unwrap(), Err(DispatchError::Timeout(_))));
        assert!(dispatcher.inner.gates.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failure_passes_through_unchanged() {
        let (dispatcher, registry) = setup();
        let (c1, rx) = connect(&registry, "s1");
        spawn_responder(&dispatcher, &c1, rx, Duration::ZERO, |_, _| {
            ToolCallResult::failure("not found")
        });

        let result = dispatcher
            .invoke("s1", ToolAction::UpdateElement, json!({"elementId": "missing"}), None)
            .await;
        assert_eq!(result, ToolCallResult::failure("not found"));
    }

    #[tokio::test]
    async fn precondition_violations_are_reported() {
        let (dispatcher, registry) = setup();
        let (_c1, _rx) = connect(&registry, "s1");

        assert!(matches!(
            dispatcher
                .try_invoke("", ToolAction::ClearCanvas, Value::Null, None)
                .await,
            Err(DispatchError::InvalidSession(_))
        ));
        assert_eq!(
            dispatcher
                .try_invoke("s1", ToolAction::ClearCanvas, Value::Null, Some(Duration::ZERO))
                .await,
            Err(DispatchError::InvalidTimeout)
        );
    }

    #[test]
    fn timeout_messages_name_the_deadline() {
        assert_eq!(
            DispatchError::Timeout(Duration::from_secs(30)).to_string(),
            "tool call timed out after 30s"
        );
        assert_eq!(
            DispatchError::Timeout(Duration::from_millis(100)).to_string(),
            "tool call timed out after 100ms"
        );
    }
}
