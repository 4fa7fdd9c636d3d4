use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{ChatMessage, Role};

/// History of a single chat session. Owned by the front-end for the lifetime
/// of the session and never persisted.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: Uuid,
    created_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Record a completed question/answer pair.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        let now = Utc::now();
        self.messages.push(ChatMessage {
            role: Role::User,
            content: question.to_string(),
            timestamp: now,
        });
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: answer.to_string(),
            timestamp: now,
        });
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

struct SessionEntry {
    conversation: Arc<Mutex<Conversation>>,
    last_active: Instant,
}

/// Live chat sessions of the web UI, each behind its own lock so turns within
/// a session run one at a time while different sessions proceed in parallel.
///
/// Sessions idle for longer than `idle_timeout` are dropped, and the store
/// never holds more than `max_sessions`; when full, the least recently used
/// session makes room for a new one.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_IDLE, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub async fn create(&self) -> (Uuid, DateTime<Utc>) {
        let conversation = Conversation::new();
        let key = (conversation.id(), conversation.created_at());

        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        Self::drop_idle(&mut sessions, now, self.idle_timeout);
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_active)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    tracing::debug!("Session {} evicted to make room", id);
                }
                None => break,
            }
        }
        sessions.insert(
            conversation.id(),
            SessionEntry {
                conversation: Arc::new(Mutex::new(conversation)),
                last_active: now,
            },
        );
        tracing::debug!("Session {} started", key.0);
        key
    }

    /// Look up a session and mark it as active.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Mutex<Conversation>>> {
        let mut sessions = self.sessions.lock().await;
        let expired = sessions.get(id)?.last_active.elapsed() > self.idle_timeout;
        if expired {
            sessions.remove(id);
            tracing::debug!("Session {} expired", id);
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.last_active = Instant::now();
        Some(Arc::clone(&entry.conversation))
    }

    /// End a session, dropping its history. Returns false for unknown ids.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.lock().await.remove(id).is_some();
        if removed {
            tracing::debug!("Session {} ended", id);
        }
        removed
    }

    /// Drop every session idle for longer than the idle timeout. Returns the
    /// number of sessions removed.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let removed = Self::drop_idle(&mut sessions, Instant::now(), self.idle_timeout);
        if removed > 0 {
            tracing::info!("Evicted {} idle sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn drop_idle(
        sessions: &mut HashMap<Uuid, SessionEntry>,
        now: Instant,
        idle: Duration,
    ) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_duration_since(entry.last_active) <= idle);
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange_appends_in_order() {
        let mut conversation = Conversation::new();
        conversation.record_exchange("Is the delivery fast?", "Yes.");
        conversation.record_exchange("Is the crust good?", "Very.");

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(conversation.messages()[2].content, "Is the crust good?");

        conversation.clear();
        assert!(conversation.is_empty());
    }

    #[test]
    fn test_sessions_are_independent() {
        tokio_test::block_on(async {
            let store = SessionStore::new();
            let (a, _) = store.create().await;
            let (b, _) = store.create().await;
            assert_ne!(a, b);

            store.get(&a).await.unwrap().lock().await.record_exchange("q", "a");
            assert_eq!(store.get(&a).await.unwrap().lock().await.len(), 2);
            assert!(store.get(&b).await.unwrap().lock().await.is_empty());

            assert!(store.remove(&a).await);
            assert!(!store.remove(&a).await);
            assert!(store.get(&a).await.is_none());
            assert_eq!(store.len().await, 1);
        });
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::with_limits(Duration::from_millis(200), 10);
        let (stale, _) = store.create().await;
        let (fresh, _) = store.create().await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.get(&fresh).await.is_some());
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(store.evict_idle().await, 1);
        assert!(store.get(&stale).await.is_none());
        assert!(store.get(&fresh).await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_gone_on_lookup() {
        let store = SessionStore::with_limits(Duration::from_millis(20), 10);
        let (id, _) = store.create().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get(&id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_store_drops_least_recently_used() {
        let store = SessionStore::with_limits(Duration::from_secs(60), 2);
        let (first, _) = store.create().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, _) = store.create().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get(&first).await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (third, _) = store.create().await;
        assert_eq!(store.len().await, 2);
        assert!(store.get(&first).await.is_some());
        assert!(store.get(&second).await.is_none());
        assert!(store.get(&third).await.is_some());
    }
}
