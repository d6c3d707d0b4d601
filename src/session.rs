use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::ServerFrame;

/// Validate a session id taken from a connection handshake.
///
/// Ids must be 1-128 chars of ASCII alphanumerics or `-`, `_`, `.`, `:`.
pub fn validate_session_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("session id must not be empty".into());
    }
    if id.len() > 128 {
        return Err(format!("session id too long ({} chars, max 128)", id.len()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(format!(
            "session id contains invalid characters: {}",
            id.chars().take(64).collect::<String>()
        ));
    }
    Ok(())
}

/// Identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Returned when a frame can no longer be delivered to a connection.
#[derive(Debug, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Non-owning handle to a live transport endpoint.
///
/// The transport task owns the socket; this handle only carries the outbound
/// frame queue and a token that fires when the transport goes away. Clones
/// are cheap and share both.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
    closed: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for the transport writer.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), ConnectionClosed> {
        if self.closed.is_cancelled() {
            return Err(ConnectionClosed(self.id));
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ConnectionClosed(self.id))
    }

    /// Mark the transport as gone. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Snapshot of one live session, as reported by `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session: String,
    pub connection: ConnectionId,
    /// Unix epoch milliseconds.
    pub connected_at: u64,
}

struct SessionEntry {
    connection: Connection,
    connected_at: u64,
}

struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    by_connection: HashMap<ConnectionId, String>,
}

/// Maps session ids to the one live connection currently serving them.
///
/// All mutations happen under a single write lock, so connect, disconnect,
/// and dispatch lookups from many concurrent sessions observe a consistent
/// table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                by_connection: HashMap::new(),
            })),
        }
    }

    /// Route `session_id` to `connection`, replacing any previous mapping.
    ///
    /// Returns the id of the connection that was displaced, if any. The
    /// displaced connection is left open; it simply stops being routable.
    pub fn register(&self, session_id: &str, connection: Connection) -> Option<ConnectionId> {
        let connection_id = connection.id();
        let mut inner = self.inner.write();

        // A connection serves at most one session.
        if let Some(old_session) = inner.by_connection.remove(&connection_id) {
            if old_session != session_id
                && inner
                    .sessions
                    .get(&old_session)
                    .is_some_and(|entry| entry.connection.id() == connection_id)
            {
                inner.sessions.remove(&old_session);
            }
        }

        let previous = inner.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                connection,
                connected_at: now_millis(),
            },
        );
        let previous_id = previous.map(|entry| entry.connection.id());
        if let Some(prev) = previous_id {
            inner.by_connection.remove(&prev);
        }
        inner
            .by_connection
            .insert(connection_id, session_id.to_string());
        drop(inner);

        match previous_id {
            Some(previous) if previous != connection_id => {
                tracing::info!(
                    session = %session_id,
                    %previous,
                    connection = %connection_id,
                    "session re-registered, previous connection no longer routable"
                );
            }
            _ => {
                tracing::info!(session = %session_id, connection = %connection_id, "session registered");
            }
        }

        previous_id.filter(|prev| *prev != connection_id)
    }

    /// Look up the connection serving `session_id`.
    ///
    /// `None` means the client is not connected; it is not a fault.
    pub fn lookup(&self, session_id: &str) -> Option<Connection> {
        let inner = self.inner.read();
        inner
            .sessions
            .get(session_id)
            .map(|entry| entry.connection.clone())
    }

    /// Remove the mapping whose value is `connection_id`, if any.
    ///
    /// Returns the session id that was unmapped. Unknown or already-replaced
    /// connections are a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<String> {
        let mut inner = self.inner.write();
        let session_id = inner.by_connection.remove(&connection_id)?;
        let owned = inner
            .sessions
            .get(&session_id)
            .is_some_and(|entry| entry.connection.id() == connection_id);
        if owned {
            inner.sessions.remove(&session_id);
        }
        drop(inner);

        if owned {
            tracing::info!(session = %session_id, connection = %connection_id, "session unregistered");
            Some(session_id)
        } else {
            None
        }
    }

    /// Snapshot of every live session, ordered by session id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let inner = self.inner.read();
        let mut sessions: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .map(|(session, entry)| SessionInfo {
                session: session.clone(),
                connection: entry.connection.id(),
                connected_at: entry.connected_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.session.cmp(&b.session));
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (Connection, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(tx), rx)
    }

    #[test]
    fn lookup_returns_registered_connection() {
        let registry = SessionRegistry::new();
        let (c1, _rx) = connection();
        registry.register("s1", c1.clone());

        let found = registry.lookup("s1").expect("session should be registered");
        assert_eq!(found.id(), c1.id());
    }

    #[test]
    fn lookup_unknown_session_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn re_register_overwrites_mapping() {
        let registry = SessionRegistry::new();
        let (c1, _rx1) = connection();
        let (c2, _rx2) = connection();

        assert_eq!(registry.register("s1", c1.clone()), None);
        assert_eq!(registry.register("s1", c2.clone()), Some(c1.id()));

        assert_eq!(registry.lookup("s1").unwrap().id(), c2.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_stale_connection_keeps_new_mapping() {
        let registry = SessionRegistry::new();
        let (c1, _rx1) = connection();
        let (c2, _rx2) = connection();
        registry.register("s1", c1.clone());
        registry.register("s1", c2.clone());

        assert_eq!(registry.unregister(c1.id()), None);
        assert_eq!(registry.lookup("s1").unwrap().id(), c2.id());
    }

    #[test]
    fn unregister_removes_owned_mapping() {
        let registry = SessionRegistry::new();
        let (c1, _rx) = connection();
        registry.register("s1", c1.clone());

        assert_eq!(registry.unregister(c1.id()), Some("s1".to_string()));
        assert!(registry.lookup("s1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (c1, _rx) = connection();
        registry.register("s1", c1.clone());

        assert!(registry.unregister(c1.id()).is_some());
        assert!(registry.unregister(c1.id()).is_none());
        assert!(registry.unregister(ConnectionId::new()).is_none());
    }

    #[test]
    fn one_connection_can_move_between_sessions() {
        let registry = SessionRegistry::new();
        let (c1, _rx) = connection();
        registry.register("s1", c1.clone());
        registry.register("s2", c1.clone());

        assert!(registry.lookup("s1").is_none());
        assert_eq!(registry.lookup("s2").unwrap().id(), c1.id());
        assert_eq!(registry.unregister(c1.id()), Some("s2".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_sorted_by_session() {
        let registry = SessionRegistry::new();
        let (a, _ra) = connection();
        let (b, _rb) = connection();
        registry.register("zeta", a);
        registry.register("alpha", b);

        let names: Vec<_> = registry.list().into_iter().map(|s| s.session).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn send_fails_after_close() {
        let (c1, mut rx) = connection();
        c1.send(ServerFrame::Hello {
            session: None,
            connection: c1.id().to_string(),
        })
        .await
        .unwrap();
        assert!(rx.recv().await.is_some());

        c1.close();
        assert!(c1
            .send(ServerFrame::Hello {
                session: None,
                connection: String::new(),
            })
            .await
            .is_err());
    }

    #[test]
    fn validate_session_id_rules() {
        assert!(validate_session_id("tab-1").is_ok());
        assert!(validate_session_id("a.b_c:d").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("slash/id").is_err());
    }

    #[test]
    fn session_info_serializes_connection_as_uuid_string() {
        let registry = SessionRegistry::new();
        let (c1, _rx) = connection();
        registry.register("s1", c1.clone());

        let json = serde_json::to_value(registry.list()).unwrap();
        assert_eq!(json[0]["session"], "s1");
        assert_eq!(json[0]["connection"], c1.id().to_string());
    }

    #[test]
    fn invalid_multibyte_session_id_is_rejected_without_panic() {
        // The 64-char excerpt in the message ends inside the two-byte 'é'.
        let id = format!("{}é{}", "a".repeat(63), "b".repeat(10));
        let err = validate_session_id(&id).unwrap_err();
        assert!(err.contains("invalid characters"), "{err}");
        assert!(err.ends_with(&format!("{}é", "a".repeat(63))), "{err}");
    }
}
