//! Session storage behind a swappable trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{ElicitationSession, SessionSummary};

/// Where sessions live between turns.
///
/// The manager serializes writers per session, so implementations only need
/// to make single operations atomic. A durable backend can replace
/// [`InMemorySessionStore`] without touching the state machine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session by id.
    async fn get(&self, session_id: &str) -> Result<Option<ElicitationSession>>;

    /// Insert or replace a session.
    async fn put(&self, session: ElicitationSession) -> Result<()>;

    /// Summaries of all sessions, oldest first.
    async fn list(&self) -> Result<Vec<SessionSummary>>;
}

/// Process-lifetime session storage.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ElicitationSession>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<ElicitationSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session: ElicitationSession) -> Result<()> {
        self.sessions.write().await.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.read().await.values().map(ElicitationSession::summary).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_and_list() {
        let store = InMemorySessionStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        let session = ElicitationSession::new("a", "Hello");
        store.put(session.clone()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(session));

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].turn_count, 0);
        assert!(!list[0].has_result);
    }
}
