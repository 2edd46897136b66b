//! Double-submit CSRF protection bound to the session.
//!
//! The token is a SHA-256 digest of the session id plus a fresh random
//! nonce, generated once per session on demand. It lives in the session
//! payload (so it survives restarts with the rest of the data) and is
//! handed to the client through a script-readable cookie; clients echo it
//! back in a request header. Verification fails closed: a session that
//! never generated a token rejects every request.

use axum::body::Body;
use axum::http::header::{ORIGIN, REFERER};
use axum::http::Request;
use url::Url;
use uuid::Uuid;

use crate::session::session::Session;
use crate::session::SessionError;

impl Session {
    /// The token stored in this session, empty when never generated.
    pub fn csrf_token(&self) -> &str {
        &self.data.csrf_token
    }

    /// Generate and store a fresh token, queueing the script-readable
    /// cookie that delivers it to the client.
    pub fn generate_csrf(&mut self) -> Result<String, SessionError> {
        if self.closed {
            return Err(SessionError::AlreadyClosed);
        }
        let Some(guard) = self.guard.as_mut() else {
            return Err(SessionError::AlreadyClosed);
        };

        let token = sha256::digest(format!("{}{}", guard.sid, Uuid::new_v4()));
        guard.data.csrf_token = token.clone();
        self.data.csrf_token = token.clone();

        let cookie_name = self.manager.inner.csrf.cookie_name.clone();
        let secure = self.manager.inner.session.cookie_secure;
        self.jar.set_script(&cookie_name, &token, 0, secure);
        Ok(token)
    }

    /// Verify the token echoed in the configured request header.
    ///
    /// Requires a non-empty header value, a non-empty stored token, and
    /// exact equality.
    pub fn verify_csrf(&self, req: &Request<Body>) -> bool {
        let token = &self.data.csrf_token;
        if token.is_empty() {
            return false;
        }
        let header_name = self.manager.inner.csrf.header_name.as_str();
        match req.headers().get(header_name).and_then(|v| v.to_str().ok()) {
            Some(header) if !header.is_empty() => header == token,
            _ => false,
        }
    }

    /// Token verification plus an `Origin`/`Referer` check against the
    /// configured trusted origins.
    pub fn verify_csrf_strict(&self, req: &Request<Body>) -> bool {
        self.verify_csrf(req) && origin_trusted(req, &self.manager.inner.csrf.trusted_origins)
    }
}

/// Whether the request's `Origin` (falling back to `Referer`) matches one
/// of the trusted origins. No header, or an unparsable one, is untrusted.
fn origin_trusted(req: &Request<Body>, trusted: &[String]) -> bool {
    let Some(value) = req
        .headers()
        .get(ORIGIN)
        .or_else(|| req.headers().get(REFERER))
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let Ok(url) = Url::parse(value) else {
        return false;
    };
    let origin = url.origin().ascii_serialization();

    trusted.iter().any(|t| {
        Url::parse(t)
            .map(|u| u.origin().ascii_serialization() == origin)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::header::COOKIE;

    use super::*;
    use crate::config::schema::{CsrfConfig, SessionConfig};
    use crate::http::cookie::CookieJar;
    use crate::session::{MemorySessionStore, SessionManager};

    fn manager() -> SessionManager {
        let csrf = CsrfConfig {
            trusted_origins: vec!["https://app.example.com".to_string()],
            ..CsrfConfig::default()
        };
        SessionManager::new(
            SessionConfig::default(),
            csrf,
            Arc::new(MemorySessionStore::new()),
        )
    }

    fn request(jar: &Arc<CookieJar>, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut().insert(jar.clone());
        req
    }

    async fn session(manager: &SessionManager) -> (Session, Arc<CookieJar>) {
        let jar = Arc::new(CookieJar::new());
        let req = request(&jar, &[]);
        (manager.start(&req).await.unwrap(), jar)
    }

    #[tokio::test]
    async fn test_token_absent_fails_closed() {
        let m = manager();
        let (s, jar) = session(&m).await;
        let req = request(&jar, &[("X-CSRF-Token", "anything")]);
        assert!(!s.verify_csrf(&req));
    }

    #[tokio::test]
    async fn test_header_missing_fails() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        s.generate_csrf().unwrap();
        let req = request(&jar, &[]);
        assert!(!s.verify_csrf(&req));
    }

    #[tokio::test]
    async fn test_mismatch_fails() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        s.generate_csrf().unwrap();
        let req = request(&jar, &[("X-CSRF-Token", "wrong")]);
        assert!(!s.verify_csrf(&req));
    }

    #[tokio::test]
    async fn test_matching_token_passes() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        let token = s.generate_csrf().unwrap();
        let req = request(&jar, &[("X-CSRF-Token", token.as_str())]);
        assert!(s.verify_csrf(&req));
    }

    #[tokio::test]
    async fn test_token_cookie_is_script_readable() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        s.generate_csrf().unwrap();

        let mut headers = axum::http::HeaderMap::new();
        jar.drain_into(&mut headers);
        let set = headers
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect::<Vec<_>>();
        let csrf = set.iter().find(|c| c.starts_with("csrf_token=")).unwrap();
        assert!(!csrf.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_strict_requires_trusted_origin() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        let token = s.generate_csrf().unwrap();

        let trusted = request(
            &jar,
            &[
                ("X-CSRF-Token", token.as_str()),
                ("Origin", "https://app.example.com"),
            ],
        );
        assert!(s.verify_csrf_strict(&trusted));

        let untrusted = request(
            &jar,
            &[
                ("X-CSRF-Token", token.as_str()),
                ("Origin", "https://evil.example.net"),
            ],
        );
        assert!(!s.verify_csrf_strict(&untrusted));

        let missing = request(&jar, &[("X-CSRF-Token", token.as_str())]);
        assert!(!s.verify_csrf_strict(&missing));
    }

    #[tokio::test]
    async fn test_strict_falls_back_to_referer() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        let token = s.generate_csrf().unwrap();
        let req = request(
            &jar,
            &[
                ("X-CSRF-Token", token.as_str()),
                ("Referer", "https://app.example.com/form"),
            ],
        );
        assert!(s.verify_csrf_strict(&req));
    }

    #[tokio::test]
    async fn test_generate_on_closed_session_fails() {
        let m = manager();
        let (mut s, _jar) = session(&m).await;
        s.close();
        assert!(matches!(
            s.generate_csrf(),
            Err(SessionError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_token_survives_in_payload() {
        let m = manager();
        let (mut s, jar) = session(&m).await;
        let token = s.generate_csrf().unwrap();
        let sid = s.sid().unwrap().to_string();
        s.close();

        // The resumed session sees the same token.
        let cookie_header = format!("session_id={sid}");
        let req = request(&jar, &[(COOKIE.as_str(), cookie_header.as_str())]);
        let resumed = m.start(&req).await.unwrap();
        assert_eq!(resumed.csrf_token(), token);
    }
}
