//! Deferred cookie handling.
//!
//! Handlers and the session layer never write response headers directly;
//! they push cookies into the request's [`CookieJar`] and the dispatcher
//! drains the jar into `Set-Cookie` headers once the handler returns. A
//! timed-out handler's cookies are never drained, which implements the
//! "writes after timeout are discarded" contract.

use std::sync::Mutex;

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use cookie::{Cookie, SameSite};

/// Buffer of cookies to set on the response.
#[derive(Debug, Default)]
pub struct CookieJar {
    pending: Mutex<Vec<Cookie<'static>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session cookie: `Path=/`, `HttpOnly`, `SameSite=Lax`. A
    /// zero `max_age_secs` scopes the cookie to the browser session.
    pub fn set_session(&self, name: &str, value: &str, max_age_secs: u64, secure: bool) {
        let mut c = base_cookie(name, value, secure);
        c.set_http_only(true);
        if max_age_secs > 0 {
            c.set_max_age(time::Duration::seconds(max_age_secs as i64));
        }
        self.push(c);
    }

    /// Queue a script-readable cookie (no `HttpOnly`) so client-side code
    /// can echo the value back, e.g. the CSRF token.
    pub fn set_script(&self, name: &str, value: &str, max_age_secs: u64, secure: bool) {
        let mut c = base_cookie(name, value, secure);
        c.set_http_only(false);
        if max_age_secs > 0 {
            c.set_max_age(time::Duration::seconds(max_age_secs as i64));
        }
        self.push(c);
    }

    /// Queue a removal cookie for the given name.
    pub fn delete(&self, name: &str, secure: bool) {
        let mut c = base_cookie(name, "", secure);
        c.make_removal();
        self.push(c);
    }

    /// Append all queued cookies as `Set-Cookie` headers.
    pub fn drain_into(&self, headers: &mut HeaderMap) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for c in pending.drain(..) {
            match HeaderValue::from_str(&c.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(err) => {
                    tracing::warn!(cookie = c.name(), error = %err, "dropping unencodable cookie");
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    fn push(&self, c: Cookie<'static>) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push(c);
    }
}

fn base_cookie(name: &str, value: &str, secure: bool) -> Cookie<'static> {
    let mut c = Cookie::new(name.to_owned(), value.to_owned());
    c.set_path("/");
    c.set_secure(secure);
    c.set_same_site(SameSite::Lax);
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(jar: &CookieJar) -> Vec<String> {
        let mut headers = HeaderMap::new();
        jar.drain_into(&mut headers);
        headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_session_cookie_attributes() {
        let jar = CookieJar::new();
        jar.set_session("sid", "abc", 0, true);
        let set = rendered(&jar);
        assert_eq!(set.len(), 1);
        assert!(set[0].starts_with("sid=abc"));
        assert!(set[0].contains("HttpOnly"));
        assert!(set[0].contains("Secure"));
        assert!(set[0].contains("SameSite=Lax"));
        assert!(set[0].contains("Path=/"));
        assert!(!set[0].contains("Max-Age"));
    }

    #[test]
    fn test_insecure_opt_out() {
        let jar = CookieJar::new();
        jar.set_session("sid", "abc", 0, false);
        assert!(!rendered(&jar)[0].contains("Secure"));
    }

    #[test]
    fn test_script_cookie_not_http_only() {
        let jar = CookieJar::new();
        jar.set_script("csrf_token", "tok", 0, true);
        let set = rendered(&jar);
        assert!(!set[0].contains("HttpOnly"));
    }

    #[test]
    fn test_persistent_cookie_max_age() {
        let jar = CookieJar::new();
        jar.set_session("sid", "abc", 3600, true);
        assert!(rendered(&jar)[0].contains("Max-Age=3600"));
    }

    #[test]
    fn test_removal_cookie() {
        let jar = CookieJar::new();
        jar.delete("sid", true);
        let set = rendered(&jar);
        assert!(set[0].starts_with("sid=;"));
        assert!(set[0].contains("Max-Age=0"));
    }

    #[test]
    fn test_drain_empties_jar() {
        let jar = CookieJar::new();
        jar.set_session("sid", "abc", 0, true);
        assert!(!jar.is_empty());
        let _ = rendered(&jar);
        assert!(jar.is_empty());
    }
}
