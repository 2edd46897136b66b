//! Session lifecycle coordination.
//!
//! # Responsibilities
//! - Resolve the session cookie to a pooled entry, hydrating from the
//!   durable store when the process has never seen the id
//! - Acquire the per-session exclusive lock before handing a [`Session`]
//!   to the handler
//! - Run the periodic purge sweep
//! - Spawn fire-and-forget persistence and deletion against the store

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::COOKIE;
use axum::http::Request;
use cookie::Cookie;
use tokio::sync::broadcast;
use tokio::sync::OwnedMutexGuard;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::schema::{CsrfConfig, SessionConfig};
use crate::http::cookie::CookieJar;
use crate::session::pool::{Pool, PooledEntry, SessionEntry};
use crate::session::session::Session;
use crate::session::store::SessionStore;
use crate::session::{unix_now, SessionData, SessionError};

pub(crate) struct ManagerInner {
    pub session: SessionConfig,
    pub csrf: CsrfConfig,
    pub pool: Pool,
    pub store: Arc<dyn SessionStore>,
}

/// Cheap-to-clone handle on the session pool and its durable store.
///
/// One instance per server; the dispatcher attaches a clone to every
/// request so handlers can call [`SessionManager::start`].
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(session: SessionConfig, csrf: CsrfConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                session,
                csrf,
                pool: Pool::new(),
                store,
            }),
        }
    }

    /// Start the session for a request and acquire its exclusive lock.
    ///
    /// Blocks while another request holds the same session id; this is the
    /// backpressure point under concurrent access to one session. A
    /// missing, unknown, or expired cookie yields a fresh session with a
    /// new cookie queued on the jar.
    pub fn start(
        &self,
        req: &Request<Body>,
    ) -> impl std::future::Future<Output = Result<Session, SessionError>> + Send + '_ {
        // Extract everything the request is needed for synchronously, so the
        // non-`Sync` `&Request<Body>` is never captured across the `.await`
        // below (which would make the returned future non-`Send`, and with it
        // every handler that awaits `start`).
        let jar = req.extensions().get::<Arc<CookieJar>>().cloned();
        let sid = self.request_sid(req);

        async move {
            let jar = jar.ok_or(SessionError::Detached)?;

            if let Some(sid) = sid {
                if let Some((entry, mut guard)) = self.fetch(&sid).await? {
                    guard.expires_unix = self.expires();
                    return Ok(Session::attach(self.clone(), jar, entry, guard));
                }
            }

            Ok(self.create(jar))
        }
    }

    /// Local pool fast path, durable store slow path. `Ok(None)` means the
    /// id is unknown or expired and the caller should mint a new session.
    async fn fetch(
        &self,
        sid: &str,
    ) -> Result<Option<(PooledEntry, OwnedMutexGuard<SessionEntry>)>, SessionError> {
        if let Some(entry) = self.inner.pool.get(sid) {
            let guard = entry.clone().lock_owned().await;
            if guard.expired(unix_now()) {
                drop(guard);
                self.inner.pool.remove(sid);
                return Ok(None);
            }
            return Ok(Some((entry, guard)));
        }

        let Some(payload) = self.inner.store.get(&self.remote_key(sid)).await? else {
            return Ok(None);
        };
        let data: SessionData = serde_json::from_str(&payload)?;

        let entry = self.inner.pool.entry_or_hydrate(sid, self.expires(), data);
        let guard = entry.clone().lock_owned().await;
        if guard.expired(unix_now()) {
            drop(guard);
            self.inner.pool.remove(sid);
            return Ok(None);
        }
        Ok(Some((entry, guard)))
    }

    fn create(&self, jar: Arc<CookieJar>) -> Session {
        let sid = Uuid::new_v4().to_string();
        jar.set_session(
            &self.inner.session.cookie_name,
            &sid,
            self.inner.session.cookie_max_age_secs,
            self.inner.session.cookie_secure,
        );

        let entry: PooledEntry =
            Arc::new(tokio::sync::Mutex::new(SessionEntry::new(&sid, self.expires())));
        let guard = entry
            .clone()
            .try_lock_owned()
            .expect("freshly created session mutex");
        self.inner.pool.insert(&sid, entry.clone());

        Session::attach(self.clone(), jar, entry, guard)
    }

    /// Session id carried by the request's cookie header, if any.
    fn request_sid(&self, req: &Request<Body>) -> Option<String> {
        let name = &self.inner.session.cookie_name;
        for header in req.headers().get_all(COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            for c in Cookie::split_parse(raw.to_string()).flatten() {
                if c.name() == name {
                    return Some(c.value().to_string());
                }
            }
        }
        None
    }

    /// Evict expired pool entries; locked entries are skipped.
    pub fn purge_expired(&self) -> usize {
        self.inner.pool.purge_expired(unix_now())
    }

    /// Spawn the periodic purge sweep, running until shutdown fires.
    pub fn spawn_purge(&self, mut shutdown: broadcast::Receiver<()>) {
        let manager = self.clone();
        let period = Duration::from_secs(self.inner.session.purge_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = manager.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "purged expired sessions");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!("session purge task stopped");
        });
    }

    /// Drop every local pool entry. Durable copies are untouched; the next
    /// `start` per id hydrates from the store. Exercised by the restart
    /// round-trip tests.
    pub fn clear_local(&self) {
        self.inner.pool.clear();
    }

    pub fn local_len(&self) -> usize {
        self.inner.pool.len()
    }

    pub(crate) fn remote_key(&self, sid: &str) -> String {
        format!("{}:{}", self.inner.session.remote_prefix, sid)
    }

    pub(crate) fn expires(&self) -> u64 {
        unix_now() + self.inner.session.ttl_secs
    }

    /// Fire-and-forget persistence; failures are logged, not propagated.
    pub(crate) fn spawn_persist(&self, sid: String, data: SessionData) {
        let store = self.inner.store.clone();
        let key = self.remote_key(&sid);
        let ttl = self.inner.session.ttl_secs;
        tokio::spawn(async move {
            let payload = match serde_json::to_string(&data) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(sid, error = %err, "session payload encode failed");
                    return;
                }
            };
            if let Err(err) = store.set(&key, payload, ttl).await {
                tracing::warn!(sid, error = %err, "session remote update failed");
            }
        });
    }

    /// Fire-and-forget remote deletion; failures are logged.
    pub(crate) fn spawn_delete(&self, sid: String) {
        let store = self.inner.store.clone();
        let key = self.remote_key(&sid);
        tokio::spawn(async move {
            if let Err(err) = store.del(&key).await {
                tracing::warn!(sid, error = %err, "session remote delete failed");
            }
        });
    }

    pub(crate) fn pool_insert(&self, sid: &str, entry: PooledEntry) {
        self.inner.pool.insert(sid, entry);
    }

    pub(crate) fn pool_remove(&self, sid: &str) {
        self.inner.pool.remove(sid);
    }

    pub(crate) fn pool_get(&self, sid: &str) -> Option<PooledEntry> {
        self.inner.pool.get(sid)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Map};

    use super::*;
    use crate::session::MemorySessionStore;

    fn manager_with_store() -> (SessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(
            SessionConfig::default(),
            CsrfConfig::default(),
            store.clone(),
        );
        (manager, store)
    }

    fn request(jar: &Arc<CookieJar>, sid: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(sid) = sid {
            builder = builder.header(COOKIE, format!("session_id={sid}"));
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut().insert(jar.clone());
        req
    }

    fn keys(entries: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_fresh_session_minted_without_cookie() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let s = manager.start(&request(&jar, None)).await.unwrap();

        assert!(s.is_empty());
        assert!(!jar.is_empty(), "session cookie queued");
        assert_eq!(manager.local_len(), 1);
        assert!(Uuid::parse_str(s.sid().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_cookie_treated_as_new() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let s = manager
            .start(&request(&jar, Some("no-such-session")))
            .await
            .unwrap();
        assert_ne!(s.sid().unwrap(), "no-such-session");
    }

    #[tokio::test]
    async fn test_write_after_close_rejected() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        s.close();
        s.close(); // idempotent

        assert!(matches!(
            s.write(keys(&[("k", json!(1))])),
            Err(SessionError::AlreadyClosed)
        ));
        assert!(matches!(s.destroy(), Err(SessionError::AlreadyClosed)));
        assert!(matches!(s.regenerate(), Err(SessionError::AlreadyClosed)));
        assert!(matches!(s.sid(), Err(SessionError::AlreadyClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_sid_fully_serialized() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.write(keys(&[("n", json!(0))])).unwrap();
        s.close();

        // Two concurrent read-modify-write requests on one sid. With the
        // exclusive lock each reads the other's committed value; without
        // it one increment would be lost.
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            let sid = sid.clone();
            tasks.push(tokio::spawn(async move {
                let jar = Arc::new(CookieJar::new());
                let mut s = manager.start(&request(&jar, Some(&sid))).await.unwrap();
                let n: i64 = s.get("n").unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                s.write(keys(&[("n", json!(n + 1))])).unwrap();
                s.close();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let jar = Arc::new(CookieJar::new());
        let s = manager.start(&request(&jar, Some(&sid))).await.unwrap();
        assert_eq!(s.get::<i64>("n"), Some(2));
    }

    #[tokio::test]
    async fn test_data_not_visible_across_sids() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        s.write(keys(&[("secret", json!("a"))])).unwrap();
        s.close();

        let other = manager.start(&request(&jar, None)).await.unwrap();
        assert_eq!(other.get::<String>("secret"), None);
    }

    #[tokio::test]
    async fn test_expired_entry_treated_as_new() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.write(keys(&[("k", json!("v"))])).unwrap();
        s.close();

        // Force expiry of the pooled entry.
        manager.pool_get(&sid).unwrap().lock().await.expires_unix = 1;

        let resumed = manager.start(&request(&jar, Some(&sid))).await.unwrap();
        assert_ne!(resumed.sid().unwrap(), sid);
        assert!(resumed.is_empty());
    }

    #[tokio::test]
    async fn test_restart_hydrates_from_store() {
        let (manager, store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.write(keys(&[("user", json!("alice"))])).unwrap();
        s.close();

        let store_probe = store.clone();
        wait_until("persist", move || store_probe.len() == 1).await;

        // Simulate a restart: the local pool is gone, only the durable
        // copy remains.
        manager.clear_local();
        assert_eq!(manager.local_len(), 0);

        let resumed = manager.start(&request(&jar, Some(&sid))).await.unwrap();
        assert_eq!(resumed.sid().unwrap(), sid);
        assert_eq!(resumed.get::<String>("user"), Some("alice".to_string()));
        assert_eq!(manager.local_len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_evicts_everywhere() {
        let (manager, store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.write(keys(&[("k", json!("v"))])).unwrap();
        s.close();
        let store_probe = store.clone();
        wait_until("persist", move || store_probe.len() == 1).await;

        let mut s = manager.start(&request(&jar, Some(&sid))).await.unwrap();
        s.destroy().unwrap();

        assert_eq!(manager.local_len(), 0);
        let store_probe = store.clone();
        wait_until("remote delete", move || store_probe.is_empty()).await;
    }

    #[tokio::test]
    async fn test_regenerate_rotates_sid_keeps_data() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let old_sid = s.sid().unwrap().to_string();
        s.write(keys(&[("user", json!("alice"))])).unwrap();

        s.regenerate().unwrap();
        let new_sid = s.sid().unwrap().to_string();
        assert_ne!(new_sid, old_sid);
        assert!(manager.pool_get(&old_sid).is_none());
        assert!(manager.pool_get(&new_sid).is_some());
        s.close();

        let resumed = manager.start(&request(&jar, Some(&new_sid))).await.unwrap();
        assert_eq!(resumed.get::<String>("user"), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_write_back_after_close() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.write(keys(&[("a", json!(1))])).unwrap();
        s.close();

        s.write_back(keys(&[("b", json!(2))])).await.unwrap();

        let resumed = manager.start(&request(&jar, Some(&sid))).await.unwrap();
        assert_eq!(resumed.get::<i64>("a"), Some(1));
        assert_eq!(resumed.get::<i64>("b"), Some(2));
    }

    #[tokio::test]
    async fn test_purge_sweep_reclaims_expired() {
        let (manager, _store) = manager_with_store();
        let jar = Arc::new(CookieJar::new());
        let mut s = manager.start(&request(&jar, None)).await.unwrap();
        let sid = s.sid().unwrap().to_string();
        s.close();

        manager.pool_get(&sid).unwrap().lock().await.expires_unix = 1;
        assert_eq!(manager.purge_expired(), 1);
        assert_eq!(manager.local_len(), 0);
    }
}
