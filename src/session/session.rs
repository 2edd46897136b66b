//! The per-request session handle.
//!
//! A `Session` owns the exclusive lock on its pooled entry from
//! [`SessionManager::start`] until `close` or `destroy`. Handlers read and
//! replace the data mapping through it; mutations reach the durable store
//! asynchronously on close.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::http::cookie::CookieJar;
use crate::session::manager::SessionManager;
use crate::session::pool::{PooledEntry, SessionEntry};
use crate::session::{unix_now, SessionData, SessionError};

pub struct Session {
    pub(crate) manager: SessionManager,
    pub(crate) jar: Arc<CookieJar>,
    pub(crate) entry: PooledEntry,
    pub(crate) guard: Option<OwnedMutexGuard<SessionEntry>>,
    /// Working copy of the pooled data, kept in step with the entry.
    pub(crate) data: SessionData,
    pub(crate) sid: String,
    pub(crate) closed: bool,
}

impl Session {
    pub(crate) fn attach(
        manager: SessionManager,
        jar: Arc<CookieJar>,
        entry: PooledEntry,
        guard: OwnedMutexGuard<SessionEntry>,
    ) -> Self {
        let sid = guard.sid.clone();
        let data = guard.data.clone();
        Self {
            manager,
            jar,
            entry,
            guard: Some(guard),
            data,
            sid,
            closed: false,
        }
    }

    /// The session id. Unavailable once closed.
    pub fn sid(&self) -> Result<&str, SessionError> {
        if self.closed {
            return Err(SessionError::AlreadyClosed);
        }
        Ok(&self.sid)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.data.keys.is_empty()
    }

    /// A copy of the session's data mapping.
    pub fn data(&self) -> Map<String, Value> {
        self.data.keys.clone()
    }

    /// Deserialize one value from the session data.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .keys
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Replace the session's data mapping.
    pub fn write(&mut self, keys: Map<String, Value>) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::AlreadyClosed);
        }
        let Some(guard) = self.guard.as_mut() else {
            return Err(SessionError::AlreadyClosed);
        };
        guard.data.keys = keys.clone();
        self.data.keys = keys;
        Ok(())
    }

    /// Merge keys into the session after it was closed: re-acquires the
    /// pooled entry, applies the keys, releases it, and persists. Errors
    /// with `NotFound`/`Expired` when the session is no longer live. On an
    /// open session this merges into the held entry directly.
    pub async fn write_back(&mut self, keys: Map<String, Value>) -> Result<(), SessionError> {
        if !self.closed {
            if let Some(guard) = self.guard.as_mut() {
                for (k, v) in keys {
                    guard.data.keys.insert(k.clone(), v.clone());
                    self.data.keys.insert(k, v);
                }
                return Ok(());
            }
            return Err(SessionError::AlreadyClosed);
        }

        let entry = self
            .manager
            .pool_get(&self.sid)
            .ok_or(SessionError::NotFound)?;
        let mut guard = entry.lock().await;
        if guard.expired(unix_now()) {
            return Err(SessionError::Expired);
        }
        for (k, v) in keys {
            guard.data.keys.insert(k.clone(), v.clone());
            self.data.keys.insert(k, v);
        }
        let (sid, data) = (guard.sid.clone(), guard.data.clone());
        drop(guard);

        self.manager.spawn_persist(sid, data);
        Ok(())
    }

    /// Close the session: release the exclusive lock and persist the data
    /// asynchronously. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(guard) = self.guard.take() {
            let (sid, data) = (guard.sid.clone(), guard.data.clone());
            drop(guard);
            self.manager.spawn_persist(sid, data);
        }
    }

    /// Permanently invalidate the session: evict it locally, delete the
    /// durable copy, and clear the session (and any CSRF) cookie.
    pub fn destroy(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::AlreadyClosed);
        }
        let Some(guard) = self.guard.take() else {
            return Err(SessionError::AlreadyClosed);
        };
        self.closed = true;

        let sid = guard.sid.clone();
        self.manager.pool_remove(&sid);
        self.manager.spawn_delete(sid);
        drop(guard);

        let secure = self.manager.inner.session.cookie_secure;
        let session_cookie = self.manager.inner.session.cookie_name.clone();
        self.jar.delete(&session_cookie, secure);
        if !self.data.csrf_token.is_empty() {
            let csrf_cookie = self.manager.inner.csrf.cookie_name.clone();
            self.jar.delete(&csrf_cookie, secure);
        }

        self.data = SessionData::default();
        Ok(())
    }

    /// Rotate the session id while preserving its data; defeats session
    /// fixation after privilege changes such as login.
    pub fn regenerate(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::AlreadyClosed);
        }
        let Some(guard) = self.guard.as_mut() else {
            return Err(SessionError::AlreadyClosed);
        };

        let old_sid = guard.sid.clone();
        self.manager.pool_remove(&old_sid);
        self.manager.spawn_delete(old_sid);

        let new_sid = Uuid::new_v4().to_string();
        self.jar.set_session(
            &self.manager.inner.session.cookie_name,
            &new_sid,
            self.manager.inner.session.cookie_max_age_secs,
            self.manager.inner.session.cookie_secure,
        );
        guard.sid = new_sid.clone();
        self.sid = new_sid.clone();

        self.manager.pool_insert(&new_sid, self.entry.clone());
        self.manager.spawn_persist(new_sid, guard.data.clone());
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed && self.guard.is_some() {
            // Lock releases with the guard; nothing is persisted.
            tracing::debug!(sid = %self.sid, "session dropped without close");
        }
    }
}
