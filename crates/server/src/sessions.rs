//! Bounded cache of open analysis sessions keyed by run and context
//!
//! The map lock is only held for lookups and inserts. Sessions are opened
//! outside it and each one carries its own lock, so requests for different
//! runs do not wait on each other. The least recently used session is evicted
//! once the cache is over capacity.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use engine::{AnalysisContext, AnalysisSession};

pub type SessionKey = (String, AnalysisContext);
pub type SharedSession = Arc<Mutex<AnalysisSession>>;

pub const DEFAULT_SESSION_CAPACITY: usize = 32;

#[derive(Default)]
struct Entries {
    map: HashMap<SessionKey, SharedSession>,
    /// Least recently used first
    order: VecDeque<SessionKey>,
}

impl Entries {
    fn touch(&mut self, key: &SessionKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

pub struct SessionCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn get(&self, key: &SessionKey) -> Option<SharedSession> {
        let mut entries = self.entries.lock().await;
        let session = entries.map.get(key).cloned()?;
        entries.touch(key);
        Some(session)
    }

    /// Store a freshly opened session. When another request stored the same
    /// key first, that session is kept and returned instead.
    pub async fn insert(&self, key: SessionKey, session: AnalysisSession) -> SharedSession {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.map.get(&key).cloned() {
            entries.touch(&key);
            return existing;
        }

        let shared = Arc::new(Mutex::new(session));
        entries.map.insert(key.clone(), Arc::clone(&shared));
        entries.order.push_back(key);
        while entries.map.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.map.remove(&oldest);
            debug!(run = %oldest.0, context = %oldest.1, "Session evicted");
        }
        shared
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.map.len()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.entries.lock().await.map.contains_key(key)
    }
}
