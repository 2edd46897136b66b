//! Request-scoped helpers for handlers.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;

use crate::session::SessionManager;

/// Ordered path parameters captured by a parameterized route, attached to
/// the request by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct PathSlugs(pub Vec<String>);

/// The nth captured path slug, if the matched route had one.
pub fn path_slug(req: &Request<Body>, index: usize) -> Option<&str> {
    req.extensions()
        .get::<PathSlugs>()
        .and_then(|slugs| slugs.0.get(index))
        .map(String::as_str)
}

/// All captured path slugs in pattern order.
pub fn path_slugs(req: &Request<Body>) -> &[String] {
    req.extensions()
        .get::<PathSlugs>()
        .map(|slugs| slugs.0.as_slice())
        .unwrap_or_default()
}

/// The server's session manager, attached to every dispatched request.
pub fn sessions(req: &Request<Body>) -> Option<SessionManager> {
    req.extensions().get::<SessionManager>().cloned()
}

/// Best-effort client address: `X-Real-Ip`, then the first
/// `X-Forwarded-For` hop, then the peer address.
pub fn client_ip(req: &Request<Body>) -> String {
    for name in ["x-real-ip", "x-forwarded-for"] {
        if let Some(value) = req.headers().get(name).and_then(|v| v.to_str().ok()) {
            if let Some(ip) = value.split(',').next().map(str::trim) {
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|peer| peer.0.ip().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[test]
    fn test_path_slug_access() {
        let mut req = request();
        req.extensions_mut()
            .insert(PathSlugs(vec!["alice".into(), "42".into()]));
        assert_eq!(path_slug(&req, 0), Some("alice"));
        assert_eq!(path_slug(&req, 1), Some("42"));
        assert_eq!(path_slug(&req, 2), None);
        assert_eq!(path_slugs(&req).len(), 2);
    }

    #[test]
    fn test_client_ip_header_precedence() {
        let mut req = Request::builder()
            .uri("/")
            .header("X-Forwarded-For", "10.0.0.2, 10.0.0.3")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.0.0.2");

        req.headers_mut()
            .insert("X-Real-Ip", "10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&req), "10.0.0.1");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let mut req = request();
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.168.1.5:9999".parse().unwrap()));
        assert_eq!(client_ip(&req), "192.168.1.5");
    }
}
