//! Request dispatch.
//!
//! # Responsibilities
//! - Resolve the subhost from the Host header
//! - Match path and method against the subhost's route table
//! - Enforce per-route timeouts (408) without killing the handler task
//! - Recover handler panics into a generic 500
//! - Drain deferred cookies into the response
//! - Record request metrics
//!
//! # Design Decisions
//! - First structural match is authoritative: a method mismatch answers
//!   405 with an `Allow` header and never falls through
//! - Timed-out handlers keep running cooperatively; their eventual
//!   response and cookies are discarded
//! - The dispatcher owns the response until the handler returns, so
//!   substituting 408/500 can never corrupt a partially sent response

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::http::cookie::CookieJar;
use crate::http::request::PathSlugs;
use crate::observability::metrics;
use crate::routing::pattern::normalize_path;
use crate::routing::table::{RouteMatch, Subhost};
use crate::session::SessionManager;

/// Shared state injected into the dispatch handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub domain: String,
    pub subhosts: Arc<HashMap<String, Arc<Subhost>>>,
    pub sessions: SessionManager,
}

/// Deadline of the matched route's timeout, attached to the request so
/// long-running handlers can observe cancellation cooperatively.
#[derive(Debug, Clone, Copy)]
pub struct RouteDeadline(pub Instant);

pub(crate) async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = normalize_path(req.uri().path()).to_string();

    let Some(fragment) = resolve_subhost(&state.domain, &req) else {
        tracing::debug!(method = %method, path = %path, peer = %peer, "Host outside served domain");
        return finish(status_response(StatusCode::NOT_FOUND), &method, "-", start);
    };
    let Some(subhost) = state.subhosts.get(&fragment) else {
        tracing::debug!(subhost = %fragment, path = %path, "Unknown subhost");
        return finish(status_response(StatusCode::NOT_FOUND), &method, &fragment, start);
    };

    let (handler, slugs) = match subhost.match_path(&path, &method) {
        RouteMatch::NotFound => {
            tracing::debug!(subhost = %fragment, method = %method, path = %path, "No route matched");
            return finish(status_response(StatusCode::NOT_FOUND), &method, &fragment, start);
        }
        RouteMatch::MethodNotAllowed { allow } => {
            let allow = allow
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let mut response = status_response(StatusCode::METHOD_NOT_ALLOWED);
            if let Ok(value) = header::HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
            return finish(response, &method, &fragment, start);
        }
        RouteMatch::Found { handler, slugs } => (handler.clone(), slugs),
    };

    if handler.blind {
        return finish(status_response(StatusCode::NOT_FOUND), &method, &fragment, start);
    }
    let Some(func) = handler.func.clone() else {
        return finish(status_response(StatusCode::NOT_FOUND), &method, &fragment, start);
    };

    let jar = Arc::new(CookieJar::new());
    req.extensions_mut().insert(jar.clone());
    req.extensions_mut().insert(PathSlugs(slugs));
    req.extensions_mut().insert(state.sessions.clone());

    let response = if handler.timeout_secs > 0 {
        let timeout = Duration::from_secs(handler.timeout_secs);
        req.extensions_mut().insert(RouteDeadline(Instant::now() + timeout));

        let task = tokio::spawn(AssertUnwindSafe(func(req)).catch_unwind());
        tokio::select! {
            joined = task => match joined {
                Ok(Ok(mut response)) => {
                    jar.drain_into(response.headers_mut());
                    response
                }
                Ok(Err(panic)) => panic_response(&method, &path, panic),
                Err(err) => {
                    tracing::error!(method = %method, path = %path, error = %err, "Handler task failed");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            },
            _ = tokio::time::sleep(timeout) => {
                // The handler task stays alive and is expected to observe
                // the deadline; whatever it produces is discarded.
                tracing::warn!(
                    method = %method,
                    path = %path,
                    timeout_secs = handler.timeout_secs,
                    "Handler exceeded route timeout"
                );
                status_response(StatusCode::REQUEST_TIMEOUT)
            }
        }
    } else {
        match AssertUnwindSafe(func(req)).catch_unwind().await {
            Ok(mut response) => {
                jar.drain_into(response.headers_mut());
                response
            }
            Err(panic) => panic_response(&method, &path, panic),
        }
    };

    finish(response, &method, &fragment, start)
}

/// Resolve the subhost fragment from the request host.
///
/// The host (header, falling back to the URI authority) is matched
/// against the served domain; the fragment before it — `"app."`, or `""`
/// for the apex — names the subhost. Hosts outside the domain resolve to
/// `None`.
fn resolve_subhost(domain: &str, req: &Request<Body>) -> Option<String> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())?;
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();

    let fragment = host.strip_suffix(domain)?;
    if fragment.is_empty() || fragment.ends_with('.') {
        Some(fragment.to_string())
    } else {
        None
    }
}

fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

fn panic_response(
    method: &Method,
    path: &str,
    panic: Box<dyn std::any::Any + Send>,
) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!(
        method = %method,
        path = %path,
        panic = message,
        backtrace = %backtrace,
        "Handler panicked"
    );
    status_response(StatusCode::INTERNAL_SERVER_ERROR)
}

fn finish(response: Response, method: &Method, subhost: &str, start: Instant) -> Response {
    metrics::record_request(method.as_str(), response.status().as_u16(), subhost, start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_host(host: &str) -> Request<Body> {
        Request::builder()
            .uri("/")
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_resolve_subhost_fragments() {
        let req = request_with_host("app.example.com");
        assert_eq!(
            resolve_subhost("example.com", &req).as_deref(),
            Some("app.")
        );

        let req = request_with_host("example.com");
        assert_eq!(resolve_subhost("example.com", &req).as_deref(), Some(""));

        let req = request_with_host("EXAMPLE.com:8080");
        assert_eq!(resolve_subhost("example.com", &req).as_deref(), Some(""));
    }

    #[test]
    fn test_resolve_subhost_rejects_foreign_hosts() {
        let req = request_with_host("other.net");
        assert_eq!(resolve_subhost("example.com", &req), None);

        // A bare suffix match without a label boundary is not our domain.
        let req = request_with_host("badexample.com");
        assert_eq!(resolve_subhost("example.com", &req), None);
    }
}
