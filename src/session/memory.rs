//! In-memory durable store for tests and development.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::session::store::{SessionStore, StoreError};
use crate::session::unix_now;

/// Process-local store with lazy TTL expiry.
///
/// Useful to exercise session persistence without a redis instance; the
/// restart round-trip tests pair it with `SessionManager::clear_local`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, (String, u64)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value().clone();
            drop(entry);
            if unix_now() >= expires_at {
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(value));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value, unix_now() + ttl_secs));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
