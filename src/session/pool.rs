//! In-process session pool.
//!
//! A sharded concurrent map from session id to pooled entry. The map
//! guards structural changes (insert/remove); each entry carries its own
//! async mutex, which is the per-session exclusive lock held for the
//! lifetime of a request.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::session::SessionData;

/// Pooled session state. Field access requires holding the entry mutex.
#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub sid: String,
    pub expires_unix: u64,
    pub data: SessionData,
}

impl SessionEntry {
    pub fn new(sid: &str, expires_unix: u64) -> Self {
        Self {
            sid: sid.to_string(),
            expires_unix,
            data: SessionData::default(),
        }
    }

    pub fn hydrated(sid: &str, expires_unix: u64, data: SessionData) -> Self {
        Self {
            sid: sid.to_string(),
            expires_unix,
            data,
        }
    }

    pub fn expired(&self, now: u64) -> bool {
        now > self.expires_unix
    }
}

pub(crate) type PooledEntry = Arc<Mutex<SessionEntry>>;

/// Process-wide map of active sessions.
#[derive(Debug, Default)]
pub(crate) struct Pool {
    entries: DashMap<String, PooledEntry>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sid: &str) -> Option<PooledEntry> {
        self.entries.get(sid).map(|e| e.value().clone())
    }

    pub fn insert(&self, sid: &str, entry: PooledEntry) {
        self.entries.insert(sid.to_string(), entry);
    }

    /// Insert a hydrated entry unless a concurrent request beat us to it,
    /// in which case the existing entry wins and the payload is dropped —
    /// the winner either hydrated the same payload or has already moved
    /// past it.
    pub fn entry_or_hydrate(&self, sid: &str, expires_unix: u64, data: SessionData) -> PooledEntry {
        self.entries
            .entry(sid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionEntry::hydrated(sid, expires_unix, data))))
            .clone()
    }

    pub fn remove(&self, sid: &str) {
        self.entries.remove(sid);
    }

    /// Evict expired entries. An entry whose mutex is held by an in-flight
    /// request is skipped and retried on the next sweep; the sweep never
    /// blocks.
    pub fn purge_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.try_lock() {
            Ok(guard) => !guard.expired(now),
            Err(_) => true,
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_removes_expired_only() {
        let pool = Pool::new();
        pool.insert("live", Arc::new(Mutex::new(SessionEntry::new("live", u64::MAX))));
        pool.insert("dead", Arc::new(Mutex::new(SessionEntry::new("dead", 1))));

        assert_eq!(pool.purge_expired(100), 1);
        assert!(pool.get("live").is_some());
        assert!(pool.get("dead").is_none());
    }

    #[tokio::test]
    async fn test_purge_skips_locked_entries() {
        let pool = Pool::new();
        let entry = Arc::new(Mutex::new(SessionEntry::new("held", 1)));
        pool.insert("held", entry.clone());

        let guard = entry.lock().await;
        assert_eq!(pool.purge_expired(100), 0);
        assert!(pool.get("held").is_some());
        drop(guard);

        assert_eq!(pool.purge_expired(100), 1);
        assert!(pool.get("held").is_none());
    }

    #[tokio::test]
    async fn test_entry_or_hydrate_keeps_existing() {
        let pool = Pool::new();
        let first = pool.entry_or_hydrate("sid", 100, SessionData::default());
        let second = pool.entry_or_hydrate("sid", 200, SessionData::default());
        assert!(Arc::ptr_eq(&first, &second));
    }
}
