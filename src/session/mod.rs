//! Session coordination subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → SessionManager::start
//!         cookie present → local pool (lock, expiry check)
//!                        → durable store (hydrate JSON payload)
//!         otherwise      → mint sid, set cookie, fresh entry
//!     → Session (exclusive per-sid lock held for the request)
//!     → write / csrf / regenerate ...
//!     → close (release lock, async persist) | destroy (evict + delete)
//!
//! Background: purge sweep evicts expired pool entries (skip-not-block).
//! ```
//!
//! # Design Decisions
//! - At most one request holds a given session at a time; the second
//!   `start` for the same sid blocks until the first closes
//! - Persistence is fire-and-forget after close; a crash loses at most
//!   the latest write
//! - Store and decode failures surface as errors, never as silent
//!   session loss

pub mod csrf;
pub mod manager;
pub mod memory;
pub mod pool;
pub mod redis;
pub mod session;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manager::SessionManager;
pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;
pub use session::Session;
pub use store::{SessionStore, StoreError};

/// The serialized session payload: arbitrary keys plus the CSRF token,
/// persisted as one JSON document in the durable store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub keys: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub csrf_token: String,
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session already closed")]
    AlreadyClosed,

    #[error("request was not routed through the dispatcher")]
    Detached,

    #[error("session payload decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match self {
            SessionError::NotFound | SessionError::Expired => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self, status = %status, "session operation failed");
        (status, status.canonical_reason().unwrap_or("error")).into_response()
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
