//! Session registry
//!
//! The one piece of shared mutable state in the orchestrator. Each
//! orchestrator owns its own registry; there is no process-wide instance.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::ExecutionSession;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ExecutionSession>>>,
    /// Container ids bound to retained sessions, so none is handed to a
    /// second session. Pruned on eviction, once the container is gone.
    containers: RwLock<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<ExecutionSession>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.id()) {
            return Err(Error::Internal(format!(
                "Duplicate session id {}",
                session.id()
            )));
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ExecutionSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<ExecutionSession>> {
        self.sessions.write().await.remove(id)
    }

    /// Bind a freshly provisioned container to its session.
    ///
    /// Fails if the id is already bound to this or any other retained session.
    pub async fn bind_container(
        &self,
        session: &ExecutionSession,
        container_id: &str,
        image: &str,
        entry: &str,
    ) -> Result<()> {
        {
            let mut containers = self.containers.write().await;
            if !containers.insert(container_id.to_string()) {
                return Err(Error::Internal(format!(
                    "Container {} is already bound to a session",
                    container_id
                )));
            }
        }
        session.attach_container(container_id, image, entry).await
    }

    /// Snapshot of every session
    pub async fn all(&self) -> Vec<Arc<ExecutionSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Sessions owned by `principal`, oldest first
    pub async fn for_principal(&self, principal: &str) -> Vec<Arc<ExecutionSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.principal() == principal)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Sessions that have not reached a terminal state
    pub async fn active(&self) -> Vec<Arc<ExecutionSession>> {
        let mut active = Vec::new();
        for session in self.all().await {
            if !session.state().await.is_terminal() {
                active.push(session);
            }
        }
        active
    }

    pub async fn active_count(&self) -> usize {
        self.active().await.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop terminal, cleaned-up sessions that ended before `now - retention`
    pub async fn evict_expired(&self, retention: ChronoDuration, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for session in self.all().await {
            if !session.is_cleaned_up() {
                continue;
            }
            if !session.state().await.is_terminal() {
                continue;
            }
            match session.ended_at().await {
                Some(ended) if ended + retention <= now => {
                    expired.push((session.id().to_string(), session.container_id().await))
                }
                _ => {}
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            let mut containers = self.containers.write().await;
            for (id, container_id) in &expired {
                sessions.remove(id);
                if let Some(container_id) = container_id {
                    containers.remove(container_id);
                }
                debug!("Evicted session {}", id);
            }
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Language, ResourcePolicy, ToolBundle};
    use crate::security::ScanResult;
    use crate::session::SessionState;

    fn session(id: &str, principal: &str) -> Arc<ExecutionSession> {
        Arc::new(ExecutionSession::new(
            id,
            principal,
            Language::Python,
            ToolBundle::single("main.py", "print(1)"),
            ResourcePolicy::default(),
            ScanResult::default(),
            10,
        ))
    }

    #[tokio::test]
    async fn test_container_ids_are_never_reused() {
        let registry = SessionRegistry::new();
        let a = session("a", "alice");
        let b = session("b", "bob");
        registry.insert(a.clone()).await.unwrap();
        registry.insert(b.clone()).await.unwrap();

        registry.bind_container(&a, "c-1", "python", "main.py").await.unwrap();
        registry.remove("a").await;
        assert!(registry.bind_container(&b, "c-1", "python", "main.py").await.is_err());
        assert_eq!(b.container_id().await, None);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let registry = SessionRegistry::new();
        registry.insert(session("a", "alice")).await.unwrap();
        assert!(registry.insert(session("a", "alice")).await.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_listing_and_active_count() {
        let registry = SessionRegistry::new();
        let a = session("a", "alice");
        registry.insert(a.clone()).await.unwrap();
        registry.insert(session("b", "alice")).await.unwrap();
        registry.insert(session("c", "bob")).await.unwrap();

        a.transition(SessionState::Failed, None).await.unwrap();
        assert_eq!(registry.for_principal("alice").await.len(), 2);
        assert_eq!(registry.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_eviction_waits_for_cleanup() {
        let registry = SessionRegistry::new();
        let a = session("a", "alice");
        registry.insert(a.clone()).await.unwrap();
        a.transition(SessionState::Stopped, None).await.unwrap();

        let later = Utc::now() + ChronoDuration::minutes(5);
        assert!(registry
            .evict_expired(ChronoDuration::minutes(1), later)
            .await
            .is_empty());

        a.claim_cleanup();
        assert_eq!(
            registry.evict_expired(ChronoDuration::minutes(1), later).await,
            vec!["a".to_string()]
        );
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_releases_container_ids() {
        let registry = SessionRegistry::new();
        for i in 0..3 {
            let s = session(&format!("s-{}", i), "alice");
            registry.insert(s.clone()).await.unwrap();
            registry
                .bind_container(&s, &format!("c-{}", i), "python", "main.py")
                .await
                .unwrap();
            s.transition(SessionState::Provisioning, None).await.unwrap();
            s.transition(SessionState::Running, None).await.unwrap();
            s.transition(SessionState::Completed, None).await.unwrap();
            s.claim_cleanup();
        }
        assert_eq!(registry.containers.read().await.len(), 3);

        let later = Utc::now() + ChronoDuration::minutes(5);
        let evicted = registry.evict_expired(ChronoDuration::minutes(1), later).await;
        assert_eq!(evicted.len(), 3);
        assert!(registry.is_empty().await);
        assert!(registry.containers.read().await.is_empty());
    }
}
