//! Gateway shared state and the live-connection registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use facetalk_core::protocol::ServerEnvelope;
use facetalk_pipeline::Pipeline;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    pub connections: ConnectionManager,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            connections: ConnectionManager::default(),
            started_at: Utc::now(),
        }
    }
}

/// Per-session handle: the outbound channel plus a token that tears the
/// session down when cancelled.
pub struct SessionHandle {
    pub event_tx: mpsc::UnboundedSender<String>,
    pub cancel: CancellationToken,
    pub connected_at: DateTime<Utc>,
    message_count: AtomicU64,
    last_activity: StdMutex<DateTime<Utc>>,
}

impl SessionHandle {
    pub fn new(event_tx: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> Self {
        let now = Utc::now();
        Self {
            event_tx,
            cancel,
            connected_at: now,
            message_count: AtomicU64::new(0),
            last_activity: StdMutex::new(now),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
}

/// Registry of live sessions, keyed by user id. One session per user: a
/// second connection for the same id replaces the first.
#[derive(Default)]
pub struct ConnectionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl ConnectionManager {
    /// Register a session, returning the handle it displaced (if any) so
    /// the caller can cancel it.
    pub async fn register(&self, user_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let previous = self
            .sessions
            .write()
            .await
            .insert(user_id.to_string(), handle);
        if previous.is_some() {
            debug!(user_id, "Existing session replaced by new connection");
        }
        previous
    }

    /// Remove a session, but only if it is still the one that owns
    /// `event_tx` — a replaced session must not tear down its successor.
    pub async fn unregister(&self, user_id: &str, event_tx: &mpsc::UnboundedSender<String>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(user_id) {
            if current.event_tx.same_channel(event_tx) {
                sessions.remove(user_id);
            }
        }
    }

    /// Record one inbound message against a user's session.
    pub async fn touch(&self, user_id: &str) {
        let sessions = self.sessions.read().await;
        if let Some(handle) = sessions.get(user_id) {
            handle.message_count.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut last) = handle.last_activity.lock() {
                *last = Utc::now();
            }
        }
    }

    /// Serialize and push an envelope to a user's session. A missing
    /// session makes this a silent no-op; a dead outbound channel is an
    /// implicit disconnect.
    pub async fn send(&self, user_id: &str, envelope: &ServerEnvelope) -> bool {
        let tx = self
            .sessions
            .read()
            .await
            .get(user_id)
            .map(|h| h.event_tx.clone());
        let Some(tx) = tx else {
            return false;
        };
        let Ok(json) = serde_json::to_string(envelope) else {
            return false;
        };
        if tx.send(json).is_ok() {
            return true;
        }
        debug!(user_id, "Outbound channel closed, dropping session");
        self.unregister(user_id, &tx).await;
        false
    }

    /// Cancel a user's session from outside the connection task.
    pub async fn disconnect(&self, user_id: &str) -> bool {
        match self.sessions.write().await.remove(user_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn list(&self) -> Vec<SessionMeta> {
        let sessions = self.sessions.read().await;
        let mut metas: Vec<_> = sessions
            .iter()
            .map(|(user_id, handle)| SessionMeta {
                user_id: user_id.clone(),
                connected_at: handle.connected_at,
                message_count: handle.message_count.load(Ordering::Relaxed),
                last_activity: handle
                    .last_activity
                    .lock()
                    .map(|t| *t)
                    .unwrap_or(handle.connected_at),
            })
            .collect();
        metas.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        metas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle() -> (SessionHandle, mpsc::UnboundedReceiver<String>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            SessionHandle::new(event_tx, CancellationToken::new()),
            event_rx,
        )
    }

    #[tokio::test]
    async fn test_register_and_send() {
        let manager = ConnectionManager::default();
        let (handle, mut rx) = make_handle();
        assert!(manager.register("alice", handle).await.is_none());

        assert!(manager.send("alice", &ServerEnvelope::pong()).await);
        let json = rx.recv().await.unwrap();
        assert!(json.contains("\"pong\""));

        assert!(!manager.send("bob", &ServerEnvelope::pong()).await);
    }

    #[tokio::test]
    async fn test_send_to_dead_channel_is_implicit_disconnect() {
        let manager = ConnectionManager::default();
        let (handle, rx) = make_handle();
        manager.register("alice", handle).await;
        drop(rx);

        assert!(!manager.send("alice", &ServerEnvelope::pong()).await);
        assert!(!manager.is_connected("alice").await);
        // And again: silent no-op once removed.
        assert!(!manager.send("alice", &ServerEnvelope::pong()).await);
    }

    #[tokio::test]
    async fn test_second_connection_replaces_first() {
        let manager = ConnectionManager::default();
        let (first, _rx1) = make_handle();
        let (second, _rx2) = make_handle();

        assert!(manager.register("alice", first).await.is_none());
        let displaced = manager.register("alice", second).await;
        assert!(displaced.is_some());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_only_removes_own_session() {
        let manager = ConnectionManager::default();
        let (first, _rx1) = make_handle();
        let first_tx = first.event_tx.clone();
        manager.register("alice", first).await;

        let (second, _rx2) = make_handle();
        manager.register("alice", second).await;

        // The displaced session's cleanup must not evict the new one.
        manager.unregister("alice", &first_tx).await;
        assert!(manager.is_connected("alice").await);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_session() {
        let manager = ConnectionManager::default();
        let (handle, _rx) = make_handle();
        let cancel = handle.cancel.clone();
        manager.register("alice", handle).await;

        assert!(manager.disconnect("alice").await);
        assert!(cancel.is_cancelled());
        assert!(!manager.is_connected("alice").await);
        assert!(!manager.disconnect("alice").await);
    }

    #[tokio::test]
    async fn test_touch_tracks_activity() {
        let manager = ConnectionManager::default();
        let (handle, _rx) = make_handle();
        manager.register("alice", handle).await;

        manager.touch("alice").await;
        manager.touch("alice").await;
        // Touching an unknown user is a no-op.
        manager.touch("ghost").await;

        let metas = manager.list().await;
        assert_eq!(metas[0].message_count, 2);
        assert!(metas[0].last_activity >= metas[0].connected_at);
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let manager = ConnectionManager::default();
        for user in ["carol", "alice", "bob"] {
            let (handle, _rx) = make_handle();
            manager.register(user, handle).await;
        }
        let metas = manager.list().await;
        let ids: Vec<_> = metas.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }
}
