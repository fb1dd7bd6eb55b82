//! Engine-scoped session registry (spec §9: "model as an explicit
//! engine-scoped registry… not a hidden singleton"), replacing quickfix's
//! process-wide static session map so multiple engines coexist in one
//! process.
//!
//! Grounded on the teacher's `gateway::Gateway`'s connection map (one
//! shared, lockable table keyed by identity, looked up by the accept loop)
//! generalized from a connection-id key to [`SessionId`].

use crate::session::Session;
use crate::session_id::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds every `Session` belonging to one engine (one `Acceptor` and/or
/// `Initiator` pair). Registration is idempotent unregistration: removing
/// a `SessionId` that isn't present is a no-op, matching
/// `original_source/src/C++/Acceptor.cpp`'s unregister-on-stop behavior
/// when a session never completed its handshake.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    pub async fn unregister(&self, session_id: &SessionId) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NullApplication;
    use crate::dictionary::DataDictionary;
    use crate::log::TracingLog;
    use crate::session::SessionConfig;
    use crate::store::InMemoryMessageStore;

    async fn sample_session(id: SessionId) -> Arc<Session> {
        Arc::new(Session::new(
            id,
            SessionConfig::default(),
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        ))
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let id = SessionId::new("FIX.4.4", "A", "B");
        registry.register(sample_session(id.clone()).await).await;
        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_missing_session_is_a_no_op() {
        let registry = SessionRegistry::new();
        let id = SessionId::new("FIX.4.4", "A", "B");
        registry.unregister(&id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unregister_removes_a_registered_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::new("FIX.4.4", "A", "B");
        registry.register(sample_session(id.clone()).await).await;
        registry.unregister(&id).await;
        assert!(registry.get(&id).await.is_none());
    }
}
