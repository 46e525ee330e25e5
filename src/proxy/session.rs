// Per-session keyed state shared across concurrent requests
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session slot holding the discussion-service bearer token
pub const DISCUSSION_TOKEN_SLOT: &str = "nodebb_authorization_token";

const SESSION_ID_HEADER: &str = "x-session-id";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Keyed values per client session. Single-key writes are atomic, last write wins.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str, key: &str) -> Option<String>;
    fn set(&self, session_id: &str, key: &str, value: String);
    fn remove(&self, session_id: &str);

    /// Drop sessions past their lifetime, returning how many went away
    fn purge_expired(&self) -> usize {
        0
    }
}

struct SessionEntry {
    slots: HashMap<String, String>,
    last_touched: Instant,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_touched) >= idle_timeout
    }
}

/// Sessions live until they go unused for `idle_timeout`; any read or write touches them.
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionEntry>,
    idle_timeout: Duration,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str, key: &str) -> Option<String> {
        let now = Instant::now();
        self.sessions
            .remove_if(session_id, |_, entry| entry.is_expired(now, self.idle_timeout));
        let mut entry = self.sessions.get_mut(session_id)?;
        entry.last_touched = now;
        entry.slots.get(key).cloned()
    }

    fn set(&self, session_id: &str, key: &str, value: String) {
        let now = Instant::now();
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                slots: HashMap::new(),
                last_touched: now,
            });
        if entry.is_expired(now, self.idle_timeout) {
            entry.slots.clear();
        }
        entry.last_touched = now;
        entry.slots.insert(key.to_string(), value);
    }

    fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.sessions.retain(|_, entry| {
            let keep = !entry.is_expired(now, self.idle_timeout);
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }
}

/// Periodically purge expired sessions until the returned task is aborted
pub fn spawn_session_sweeper(
    store: Arc<dyn SessionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    let every = every.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} idle sessions", purged);
            }
        }
    })
}

/// A resolved session id bound to the store it lives in
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    store: Arc<dyn SessionStore>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    /// Resolve the caller's session from the session cookie, then the `x-session-id` header
    pub fn from_headers(
        headers: &HeaderMap,
        cookie_name: &str,
        store: Arc<dyn SessionStore>,
    ) -> Option<Self> {
        let id = cookie_value(headers, cookie_name).or_else(|| {
            headers
                .get(SESSION_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })?;
        Some(Self::new(id, store))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.id, key)
    }

    pub fn set(&self, key: &str, value: String) {
        self.store.set(&self.id, key, value)
    }

    pub fn remove(&self) {
        self.store.remove(&self.id)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
