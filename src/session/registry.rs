use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::Session;

pub type SharedSession = Arc<Mutex<Session>>;

/// Process-wide map of live sessions. Each session sits behind its own async
/// mutex: operations on one session run one at a time, different sessions
/// run concurrently.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SharedSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `id`, created with `make` on first reference.
    pub fn get_or_create(&self, id: &str, make: impl FnOnce() -> Session) -> SharedSession {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = id, "session created");
                Arc::new(Mutex::new(make()))
            })
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Install `session`, replacing any live session with the same id.
    pub fn replace(&self, session: Session) -> SharedSession {
        let id = session.id().to_string();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(id, shared.clone());
        shared
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Ids of live sessions, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;

    #[tokio::test]
    async fn creates_once_and_reuses() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("s1", || Session::new("s1", BudgetLimits::new()));
        a.lock().await.note("search", "first");
        let b = registry.get_or_create("s1", || panic!("must not create twice"));
        assert_eq!(b.lock().await.log().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn replace_and_remove() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1", || Session::new("s1", BudgetLimits::new()));
        let mut fresh = Session::new("s1", BudgetLimits::new());
        fresh.note("restored", "from disk");
        registry.replace(fresh);
        assert_eq!(registry.get("s1").unwrap().lock().await.log().len(), 1);

        assert!(registry.remove("s1"));
        assert!(!registry.remove("s1"));
        assert!(registry.is_empty());
        assert!(registry.ids().is_empty());
    }
}
