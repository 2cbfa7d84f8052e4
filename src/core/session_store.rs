//! Keyed chat sessions with least-recently-used eviction.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::conversation::Conversation;

#[derive(Debug)]
pub struct ChatSession {
    pub conversation: Conversation,
    last_used: DateTime<Utc>,
}

impl ChatSession {
    fn new() -> Self {
        Self {
            conversation: Conversation::new(),
            last_used: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Utc::now();
    }
}

/// Owns every active chat session. Sessions are handed out behind their own
/// mutex so concurrent requests for different sessions never serialize on
/// the store.
pub struct SessionStore {
    inner: Mutex<HashMap<String, Arc<Mutex<ChatSession>>>>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Returns the session for `id`, creating it if unknown. When the store
    /// is full, the session that has gone longest without use is dropped
    /// before the new one is inserted.
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<ChatSession>> {
        let mut sessions = self.inner.lock().await;
        if let Some(session) = sessions.get(id) {
            let session = session.clone();
            drop(sessions);
            session.lock().await.touch();
            return session;
        }

        if sessions.len() >= self.capacity {
            let mut stalest: Option<(String, DateTime<Utc>)> = None;
            for (key, session) in sessions.iter() {
                // try_lock: a session locked by an in-flight request is in
                // use and not an eviction candidate.
                if let Ok(guard) = session.try_lock() {
                    let is_staler = stalest
                        .as_ref()
                        .is_none_or(|(_, time)| guard.last_used < *time);
                    if is_staler {
                        stalest = Some((key.clone(), guard.last_used));
                    }
                }
            }
            if let Some((key, _)) = stalest {
                debug!(session = %key, "evicting least recently used chat session");
                sessions.remove(&key);
            }
        }

        let session = Arc::new(Mutex::new(ChatSession::new()));
        sessions.insert(id.to_string(), session.clone());
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Role;

    #[tokio::test]
    async fn returns_the_same_session_for_the_same_id() {
        let store = SessionStore::new(4);
        let first = store.get_or_create("abc").await;
        first
            .lock()
            .await
            .conversation
            .push(Role::User, "remember me");

        let second = store.get_or_create("abc").await;
        assert_eq!(second.lock().await.conversation.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_at_capacity() {
        let store = SessionStore::new(2);
        store.get_or_create("old").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.get_or_create("newer").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        // Touching "old" makes "newer" the eviction candidate.
        store.get_or_create("old").await;

        store.get_or_create("third").await;
        assert_eq!(store.len().await, 2);

        let sessions = store.inner.lock().await;
        assert!(sessions.contains_key("old"));
        assert!(sessions.contains_key("third"));
        assert!(!sessions.contains_key("newer"));
    }

    #[tokio::test]
    async fn never_evicts_a_session_in_use() {
        let store = SessionStore::new(1);
        let busy = store.get_or_create("busy").await;
        let _guard = busy.lock().await;

        store.get_or_create("next").await;
        let sessions = store.inner.lock().await;
        assert!(sessions.contains_key("busy"));
        assert!(sessions.contains_key("next"));
    }
}
