//! In-memory session store.
//!
//! Owns every [`Session`] of the process. Handlers, the event relay and the
//! eviction task share one store through `Arc`; each update runs under the
//! write lock so a transition is never interleaved with another.

use std::collections::HashMap;

use relay_core::error::CoreError;
use relay_core::session::Session;
use relay_core::types::{SessionId, Timestamp};
use tokio::sync::RwLock;

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session with a fresh id. Returns a copy of it.
    pub async fn create(&self) -> Session {
        let session = Session::new(SessionId::new());
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        tracing::info!(session_id = %session.id, client_id = %session.client_id, "Session created");
        session
    }

    /// Copy of the current state of a session.
    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Like [`get`](Self::get) but fails with `NotFound`.
    pub async fn require(&self, id: SessionId) -> Result<Session, CoreError> {
        self.get(id).await.ok_or_else(|| CoreError::NotFound {
            entity: "Session",
            id: id.to_string(),
        })
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Apply `f` to a session under the write lock.
    ///
    /// Returns `None` when the session does not exist.
    pub async fn update<F, R>(&self, id: SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(&id).map(f)
    }

    pub async fn remove(&self, id: SessionId) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    /// Remove every session that [`Session::is_evictable`] at `now`.
    /// Returns the removed ids.
    pub async fn evict(
        &self,
        now: Timestamp,
        ttl: chrono::Duration,
        idle_ttl: chrono::Duration,
    ) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.is_evictable(now, ttl, idle_ttl))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
