//! Route and handler types shared by the routing subsystem.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::routing::pattern::RoutePattern;

/// Errors detected at route registration.
///
/// These represent programmer error in the route table; startup code is
/// expected to propagate them and abort rather than serve with a broken
/// table.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route pattern cannot be empty")]
    EmptyPattern,

    #[error("route pattern must start with '/': {0} -> /{0}")]
    MissingLeadingSlash(String),

    #[error("route segment cannot be empty: {0}")]
    EmptySegment(String),

    #[error("invalid chars in segment: {segment} ({pattern})")]
    InvalidSegmentChars { segment: String, pattern: String },

    #[error("invalid route parameter: {0}")]
    InvalidParameter(String),

    #[error(":file can only be the last segment of an exact route: {0}")]
    FileNotLast(String),

    #[error("route is duplicate: {method} {pattern}")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("route is redundant (wildcard and specific methods mixed): {method} {pattern}")]
    RedundantMethod { method: Method, pattern: String },

    #[error("routes with exact/prefix semantics cannot be mixed: {0}")]
    ExactPrefixMix(String),

    #[error("route pattern regex: {0}")]
    Regex(#[from] regex::Error),
}

/// HTTP method selector for a route handler.
///
/// `Any` is the wildcard: it answers every method and cannot coexist with
/// specific-method handlers on the same route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Any => "*",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Whether this selector answers the given request method.
    pub fn answers(&self, method: &axum::http::Method) -> bool {
        match self {
            Method::Any => true,
            _ => method.as_str() == self.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed response future produced by a route handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Type-erased route handler function.
pub type HandlerFn = Arc<dyn Fn(Request<Body>) -> HandlerFuture + Send + Sync>;

/// Erase a typed async handler into a [`HandlerFn`].
pub(crate) fn erase_handler<H, Fut, R>(handler: H) -> HandlerFn
where
    H: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req| -> HandlerFuture {
        let fut = handler(req);
        Box::pin(async move { fut.await.into_response() })
    })
}

/// Handler entry for one method on a route.
#[derive(Clone)]
pub struct RouteHandler {
    /// Seconds the dispatcher waits before answering 408; 0 disables the
    /// deadline and runs the handler inline.
    pub timeout_secs: u64,
    /// Blind routes answer 404 unconditionally; they exist to shadow
    /// descendants of a more specific pattern.
    pub blind: bool,
    pub(crate) func: Option<HandlerFn>,
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandler")
            .field("timeout_secs", &self.timeout_secs)
            .field("blind", &self.blind)
            .field("func", &self.func.is_some())
            .finish()
    }
}

/// One registered route: a compiled pattern plus its per-method handlers.
///
/// Handlers keep registration order so the `Allow` header on a 405 lists
/// methods deterministically.
#[derive(Debug)]
pub struct Route {
    pub(crate) pattern: RoutePattern,
    pub(crate) handlers: Vec<(Method, RouteHandler)>,
}

impl Route {
    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    /// Resolve a request method against this route's handlers.
    pub fn handler_for(&self, method: &axum::http::Method) -> Option<&RouteHandler> {
        self.handlers
            .iter()
            .find(|(m, _)| m.answers(method))
            .map(|(_, h)| h)
    }

    /// Registered methods, in registration order.
    pub fn methods(&self) -> Vec<Method> {
        self.handlers.iter().map(|(m, _)| *m).collect()
    }
}
