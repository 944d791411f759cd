//! In-memory conversation store.
//!
//! Locking is two-level: the map lock is held only long enough to find or
//! insert an entry, and every session sits behind its own mutex. Two users
//! never contend on session contents.
//!
//! Nothing here is persisted. Sessions live until cleared, or until the
//! store reaches capacity and the least recently active session is evicted.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{ConversationSession, Role, Turn};

type SharedSession = Arc<Mutex<ConversationSession>>;

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    /// Generation id of the session the turn landed in.
    pub session_id: String,
    /// Turn count after the append.
    pub turns: usize,
}

/// Concurrency-safe map from user identity to conversation session.
pub struct SessionStore {
    preamble: String,
    sessions: Mutex<LruCache<String, SharedSession>>,
}

impl SessionStore {
    /// Create a store seeding new sessions with `preamble`, holding at most
    /// `capacity` sessions.
    pub fn new(preamble: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            preamble: preamble.into(),
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Find the user's session, seeding one if none exists.
    async fn entry(&self, user_id: &str) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(user_id) {
            return Arc::clone(session);
        }

        let session = Arc::new(Mutex::new(ConversationSession::seeded(&self.preamble)));
        if let Some((evicted, _)) = sessions.push(user_id.to_string(), Arc::clone(&session)) {
            debug!(user = %evicted, "Session store at capacity, evicted least recently active session");
        }
        session
    }

    /// Get a copy of the user's session, seeding it with the preamble if needed.
    pub async fn get_or_create(&self, user_id: &str) -> ConversationSession {
        let session = self.entry(user_id).await;
        let guard = session.lock().await;
        guard.clone()
    }

    /// Append a turn, creating the session if needed.
    pub async fn append(&self, user_id: &str, role: Role, content: impl Into<String>) -> Appended {
        let session = self.entry(user_id).await;
        let mut guard = session.lock().await;
        let turns = guard.push(role, content);
        Appended {
            session_id: guard.id.clone(),
            turns,
        }
    }

    /// Append a turn only if the user's current session is still `session_id`.
    ///
    /// Returns `false` when the session was cleared or evicted (and maybe
    /// reseeded) since `session_id` was observed.
    pub async fn append_to(
        &self,
        user_id: &str,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> bool {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(user_id) {
                Some(session) => Arc::clone(session),
                None => return false,
            }
        };

        let mut guard = session.lock().await;
        if guard.id != session_id {
            return false;
        }
        guard.push(role, content);
        true
    }

    /// Current turns of the user's session, seeding it if needed.
    pub async fn snapshot(&self, user_id: &str) -> Vec<Turn> {
        let session = self.entry(user_id).await;
        let guard = session.lock().await;
        guard.turns().to_vec()
    }

    /// Turns of session `session_id`, or `None` if it is no longer current.
    pub async fn history(&self, user_id: &str, session_id: &str) -> Option<Vec<Turn>> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.get(user_id).map(Arc::clone)?
        };
        let guard = session.lock().await;
        (guard.id == session_id).then(|| guard.turns().to_vec())
    }

    /// Generation id of the user's current session, if one exists.
    pub async fn session_id(&self, user_id: &str) -> Option<String> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions.peek(user_id).map(Arc::clone)?
        };
        let guard = session.lock().await;
        Some(guard.id.clone())
    }

    /// Remove the user's session entirely. Returns whether one existed.
    pub async fn clear(&self, user_id: &str) -> bool {
        self.sessions.lock().await.pop(user_id).is_some()
    }

    /// Whether a session currently exists for the user.
    pub async fn contains(&self, user_id: &str) -> bool {
        self.sessions.lock().await.contains(user_id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREAMBLE: &str = "You are a supportive listener.";

    #[tokio::test]
    async fn get_or_create_seeds_preamble() {
        let store = SessionStore::new(PREAMBLE, 16);
        let session = store.get_or_create("alice").await;
        assert_eq!(session.turns(), &[Turn::system(PREAMBLE)]);
    }

    #[tokio::test]
    async fn append_is_ordered() {
        let store = SessionStore::new(PREAMBLE, 16);
        let first = store.append("alice", Role::User, "hello").await;
        let second = store.append("alice", Role::Assistant, "hi").await;
        assert_eq!(second.turns, 3);
        assert_eq!(first.session_id, second.session_id);

        let turns = store.snapshot("alice").await;
        assert_eq!(
            turns,
            vec![Turn::system(PREAMBLE), Turn::user("hello"), Turn::assistant("hi")]
        );
    }

    #[tokio::test]
    async fn clear_then_get_or_create_yields_single_preamble() {
        let store = SessionStore::new(PREAMBLE, 16);
        store.append("alice", Role::User, "something private").await;
        assert!(store.clear("alice").await);

        let session = store.get_or_create("alice").await;
        assert_eq!(session.len(), 1);
        assert_eq!(session.turns()[0], Turn::system(PREAMBLE));
    }

    #[tokio::test]
    async fn clear_missing_session_is_noop() {
        let store = SessionStore::new(PREAMBLE, 16);
        assert!(!store.clear("nobody").await);
    }

    #[tokio::test]
    async fn append_to_rejects_reseeded_session() {
        let store = SessionStore::new(PREAMBLE, 16);
        store.append("alice", Role::User, "hello").await;
        let stale_id = store.session_id("alice").await.unwrap();

        store.clear("alice").await;
        store.get_or_create("alice").await;

        assert!(!store.append_to("alice", &stale_id, Role::Assistant, "late").await);
        assert_eq!(store.snapshot("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn history_requires_current_session() {
        let store = SessionStore::new(PREAMBLE, 16);
        let appended = store.append("alice", Role::User, "hello").await;
        assert_eq!(
            store.history("alice", &appended.session_id).await.map(|t| t.len()),
            Some(2)
        );

        store.clear("alice").await;
        assert!(store.history("alice", &appended.session_id).await.is_none());
        assert!(!store.contains("alice").await);
    }

    #[tokio::test]
    async fn append_to_missing_session_does_not_create_one() {
        let store = SessionStore::new(PREAMBLE, 16);
        assert!(!store.append_to("ghost", "id", Role::Assistant, "x").await);
        assert!(!store.contains("ghost").await);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = Arc::new(SessionStore::new(PREAMBLE, 64));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let user = format!("user-{i}");
                for n in 0..20 {
                    store.append(&user, Role::User, format!("{user}:{n}")).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            let user = format!("user-{i}");
            let turns = store.snapshot(&user).await;
            assert_eq!(turns.len(), 21);
            assert!(turns[1..].iter().all(|t| t.content.starts_with(&user)));
        }
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_active() {
        let store = SessionStore::new(PREAMBLE, 2);
        store.append("alice", Role::User, "a").await;
        store.append("bob", Role::User, "b").await;
        // touch alice so bob becomes least recently active
        store.append("alice", Role::User, "a2").await;
        store.append("carol", Role::User, "c").await;

        assert_eq!(store.len().await, 2);
        assert!(store.contains("alice").await);
        assert!(!store.contains("bob").await);
        assert!(store.contains("carol").await);
    }
}
