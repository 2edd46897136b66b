//! Durable store contract.
//!
//! The session layer persists serialized payloads through this trait;
//! redis backs production, an in-memory map backs tests and development.
//! Keys arrive already namespaced (`"{prefix}:{sid}"`).

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection pool exhausted, node
    /// down).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the command failed.
    #[error("store command failed: {0}")]
    Command(String),
}

/// Key/value store with TTL-scoped writes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value with a TTL in seconds.
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete a key; deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}
