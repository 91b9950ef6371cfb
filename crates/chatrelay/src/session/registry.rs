use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::background::BackgroundTasks;

use super::error::SessionError;
use super::live::Session;

/// Live sessions keyed by conversation id.
///
/// A key is present exactly while its session can still be cancelled.
/// Relay tasks are spawned through the registry so shutdown can wait for them.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    tasks: BackgroundTasks,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            tasks: BackgroundTasks::named("relay"),
        }
    }

    /// Insert a session. Fails if its key already has a live session.
    pub fn register(&self, session: Arc<Session>) -> Result<(), SessionError> {
        match self.sessions.entry(session.key().to_string()) {
            Entry::Occupied(entry) => Err(SessionError::AlreadyActive(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(session_id = %session.id(), key = %session.key(), "Session registered");
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Remove `key` only while it still maps to `session_id`.
    pub fn remove_session(&self, key: &str, session_id: &str) -> bool {
        self.sessions
            .remove_if(key, |_, session| session.id() == session_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Run a session's relay task.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Cancel every live session and wait for the relay tasks to resolve them.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        if !live.is_empty() {
            info!(count = live.len(), "Cancelling live sessions");
        }
        for session in live {
            session.cancel_token().cancel();
        }
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::test_session;

    #[test]
    fn one_session_per_key() {
        let registry = SessionRegistry::new();
        registry.register(test_session("conv")).unwrap();

        let err = registry.register(test_session("conv")).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(key) if key == "conv"));
        registry.register(test_session("other")).unwrap();

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, ["conv", "other"]);
    }

    #[test]
    fn lookup_and_remove() {
        let registry = SessionRegistry::new();
        let session = test_session("conv");
        registry.register(session.clone()).unwrap();

        assert_eq!(registry.lookup("conv").unwrap().id(), session.id());
        assert!(matches!(registry.lookup("nope"), Err(SessionError::NotFound(_))));

        assert!(registry.remove("conv"));
        assert!(!registry.remove("conv"));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_session_ignores_a_newer_session() {
        let registry = SessionRegistry::new();
        let old = test_session("conv");
        registry.register(old.clone()).unwrap();
        registry.remove("conv");

        let new = test_session("conv");
        registry.register(new.clone()).unwrap();

        assert!(!registry.remove_session("conv", old.id()));
        assert!(registry.contains("conv"));
        assert!(registry.remove_session("conv", new.id()));
        assert!(!registry.contains("conv"));
    }

    #[tokio::test]
    async fn shutdown_cancels_and_waits() {
        let registry = SessionRegistry::new();
        let session = test_session("conv");
        registry.register(session.clone()).unwrap();

        let task_session = session.clone();
        let task_registry = registry.clone();
        registry.spawn(async move {
            task_session.cancel_token().cancelled().await;
            task_registry.remove_session(task_session.key(), task_session.id());
        });

        registry.shutdown().await;
        assert!(session.cancel_token().is_cancelled());
        assert!(registry.is_empty());
    }
}
