//! Sessions and session stores.
//!
//! A [`Session`] is a cloneable handle over a bag of JSON values scoped to
//! one visitor, identified by a random id carried in a cookie. Handlers read
//! and write it through the [`RoutingContext`](crate::context::RoutingContext);
//! a [`SessionStore`] persists it between requests. The in-process
//! [`LocalSessionStore`] is the default; distributed deployments implement
//! the trait over their own backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::WebError;

/// The default session lifetime when none is configured: 30 minutes.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A visitor-scoped bag of JSON values behind a random id.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

struct SessionState {
    id: String,
    /// Previous id after [`Session::regenerate_id`], so the store can drop
    /// the stale entry.
    old_id: Option<String>,
    data: HashMap<String, Value>,
    timeout: Duration,
    /// Set by any mutation; cleared when the store flushes the session.
    dirty: bool,
    destroyed: bool,
}

impl Session {
    /// Creates a fresh session with a random id.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                id: new_session_id(),
                old_id: None,
                data: HashMap::new(),
                timeout,
                dirty: false,
                destroyed: false,
            })),
        }
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    /// The lifetime after which a store may drop this session.
    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) -> &Self {
        let mut state = self.lock();
        state.data.insert(key.to_string(), value.into());
        state.dirty = true;
        self
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let removed = state.data.remove(key);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// A snapshot of every entry.
    pub fn entries(&self) -> HashMap<String, Value> {
        self.lock().data.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Swaps the id for a fresh one while keeping the data, the standard
    /// move after a privilege change. The old id is remembered so the store
    /// can delete its entry on the next flush.
    pub fn regenerate_id(&self) -> &Self {
        let mut state = self.lock();
        let old = std::mem::replace(&mut state.id, new_session_id());
        state.old_id.get_or_insert(old);
        state.dirty = true;
        self
    }

    /// Marks the session for deletion at the end of the request.
    pub fn destroy(&self) -> &Self {
        let mut state = self.lock();
        state.data.clear();
        state.destroyed = true;
        self
    }

    pub fn destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Whether the session has unflushed changes.
    pub fn dirty(&self) -> bool {
        self.lock().dirty
    }

    /// The id replaced by [`regenerate_id`](Self::regenerate_id), until the
    /// store flushes.
    pub fn old_id(&self) -> Option<String> {
        self.lock().old_id.clone()
    }

    /// Called by stores after a successful write.
    pub fn mark_flushed(&self) -> &Self {
        let mut state = self.lock();
        state.dirty = false;
        state.old_id = None;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("entries", &state.data.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Persistence backend for sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Looks up a session by id; `Ok(None)` for unknown or expired ids.
    async fn get(&self, id: &str) -> Result<Option<Session>, WebError>;

    /// Writes the session, refreshing its expiry.
    async fn put(&self, session: &Session) -> Result<(), WebError>;

    async fn delete(&self, id: &str) -> Result<(), WebError>;

    async fn clear(&self) -> Result<(), WebError>;

    async fn size(&self) -> Result<usize, WebError>;
}

/// In-process session store with lazy expiry.
pub struct LocalSessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

struct StoredSession {
    session: Session,
    expires_at: Instant,
}

impl LocalSessionStore {
    pub fn new() -> Self {
        Self { sessions: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LocalSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, WebError> {
        let mut sessions = self.lock();
        match sessions.get(id) {
            Some(stored) if stored.expires_at > Instant::now() => Ok(Some(stored.session.clone())),
            Some(_) => {
                sessions.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<(), WebError> {
        let mut sessions = self.lock();
        if let Some(old_id) = session.old_id() {
            sessions.remove(&old_id);
        }
        let expires_at = Instant::now() + session.timeout();
        sessions.insert(session.id(), StoredSession { session: session.clone(), expires_at });
        drop(sessions);
        session.mark_flushed();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), WebError> {
        self.lock().remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), WebError> {
        self.lock().clear();
        Ok(())
    }

    async fn size(&self) -> Result<usize, WebError> {
        let mut sessions = self.lock();
        let now = Instant::now();
        sessions.retain(|_, stored| stored.expires_at > now);
        Ok(sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_marks_dirty_and_flush_clears_it() {
        let session = Session::new(DEFAULT_SESSION_TIMEOUT);
        assert!(!session.dirty());

        session.put("count", 1);
        assert!(session.dirty());
        assert_eq!(session.get("count"), Some(Value::from(1)));

        session.mark_flushed();
        assert!(!session.dirty());
    }

    #[test]
    fn regenerate_keeps_data_and_remembers_old_id() {
        let session = Session::new(DEFAULT_SESSION_TIMEOUT);
        session.put("user", "alice");
        let first = session.id();

        session.regenerate_id();
        assert_ne!(session.id(), first);
        assert_eq!(session.old_id(), Some(first.clone()));
        assert_eq!(session.get("user"), Some(Value::from("alice")));

        // a second regeneration still points at the originally stored id
        session.regenerate_id();
        assert_eq!(session.old_id(), Some(first));
    }

    #[test]
    fn destroy_clears_data() {
        let session = Session::new(DEFAULT_SESSION_TIMEOUT);
        session.put("user", "alice");
        session.destroy();
        assert!(session.destroyed());
        assert!(session.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn local_store_round_trip() {
        let store = LocalSessionStore::new();
        let session = Session::new(DEFAULT_SESSION_TIMEOUT);
        session.put("k", "v");

        store.put(&session).await.unwrap();
        assert!(!session.dirty());
        assert_eq!(store.size().await.unwrap(), 1);

        let loaded = store.get(&session.id()).await.unwrap().unwrap();
        assert_eq!(loaded.get("k"), Some(Value::from("v")));

        store.delete(&session.id()).await.unwrap();
        assert!(store.get(&session.id()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn local_store_expires_sessions() {
        let store = LocalSessionStore::new();
        let session = Session::new(Duration::ZERO);
        store.put(&session).await.unwrap();

        assert!(store.get(&session.id()).await.unwrap().is_none());
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn local_store_drops_old_id_after_regeneration() {
        let store = LocalSessionStore::new();
        let session = Session::new(DEFAULT_SESSION_TIMEOUT);
        store.put(&session).await.unwrap();
        let first = session.id();

        session.regenerate_id();
        store.put(&session).await.unwrap();

        assert!(store.get(&first).await.unwrap().is_none());
        assert!(store.get(&session.id()).await.unwrap().is_some());
        assert_eq!(store.size().await.unwrap(), 1);
    }
}
