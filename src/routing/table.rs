//! Per-subhost route table.
//!
//! # Responsibilities
//! - Register routes (`route`, `route_exact`, `route_blind`) with full
//!   validation of the pattern and method set
//! - Optionally sort routes by priority when the table is frozen
//! - Resolve a normalized path + method to a handler
//!
//! # Design Decisions
//! - Tables are built at startup and immutable while serving; the match
//!   loop takes no locks
//! - First structural match wins; a method mismatch inside the matched
//!   route answers 405 without falling through to lower routes
//! - Priority ordering is opt-in per subhost; the default is registration
//!   order

use std::collections::HashMap;
use std::future::Future;

use axum::body::Body;
use axum::http::Request;
use axum::response::IntoResponse;

use crate::routing::pattern::RoutePattern;
use crate::routing::route::{erase_handler, Method, Route, RouteError, RouteHandler};

/// Outcome of matching a request against a subhost's table.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    /// Structural and method match. The handler may still be blind.
    Found {
        handler: &'a RouteHandler,
        slugs: Vec<String>,
    },
    /// Structural match, no handler for the method.
    MethodNotAllowed { allow: Vec<Method> },
    /// No route matched the path.
    NotFound,
}

/// A named virtual-host fragment owning an ordered list of routes.
///
/// Names carry the subdomain fragment including the trailing dot
/// (`"app."`); the empty string addresses the apex domain.
#[derive(Debug)]
pub struct Subhost {
    name: String,
    routes: Vec<Route>,
    by_pattern: HashMap<String, usize>,
    priority: bool,
}

impl Subhost {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routes: Vec::new(),
            by_pattern: HashMap::new(),
            priority: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enable priority ordering for this subhost. Routes are re-ordered
    /// once when the server freezes its tables: exact patterns first, then
    /// longer literal prefixes, parameterized patterns after literal ones,
    /// registration order as the tie-breaker.
    pub fn priority_routing(&mut self) -> &mut Self {
        self.priority = true;
        self
    }

    /// Register a prefix route.
    pub fn route<H, Fut, R>(
        &mut self,
        method: Method,
        pattern: &str,
        timeout_secs: u64,
        handler: H,
    ) -> Result<&mut Self, RouteError>
    where
        H: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.register(
            method,
            pattern,
            false,
            RouteHandler {
                timeout_secs,
                blind: false,
                func: Some(erase_handler(handler)),
            },
        )
    }

    /// Register an exact route.
    pub fn route_exact<H, Fut, R>(
        &mut self,
        method: Method,
        pattern: &str,
        timeout_secs: u64,
        handler: H,
    ) -> Result<&mut Self, RouteError>
    where
        H: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.register(
            method,
            pattern,
            true,
            RouteHandler {
                timeout_secs,
                blind: false,
                func: Some(erase_handler(handler)),
            },
        )
    }

    /// Register a blind route: every path under it answers 404, shadowing
    /// descendants of a more specific pattern.
    pub fn route_blind(&mut self, method: Method, pattern: &str) -> Result<&mut Self, RouteError> {
        self.register(
            method,
            pattern,
            false,
            RouteHandler {
                timeout_secs: 0,
                blind: true,
                func: None,
            },
        )
    }

    fn register(
        &mut self,
        method: Method,
        pattern: &str,
        exact: bool,
        handler: RouteHandler,
    ) -> Result<&mut Self, RouteError> {
        let compiled = RoutePattern::parse(pattern, exact)?;
        let key = compiled.pattern().to_string();

        if let Some(&index) = self.by_pattern.get(&key) {
            let route = &mut self.routes[index];
            Self::validate_existing(route, method, &key, exact)?;
            route.handlers.push((method, handler));
        } else {
            self.by_pattern.insert(key, self.routes.len());
            self.routes.push(Route {
                pattern: compiled,
                handlers: vec![(method, handler)],
            });
        }

        Ok(self)
    }

    fn validate_existing(
        route: &Route,
        method: Method,
        pattern: &str,
        exact: bool,
    ) -> Result<(), RouteError> {
        if route.pattern.is_exact() != exact {
            return Err(RouteError::ExactPrefixMix(pattern.to_string()));
        }
        if route.handlers.iter().any(|(m, _)| *m == method) {
            return Err(RouteError::DuplicateRoute {
                method,
                pattern: pattern.to_string(),
            });
        }
        if method == Method::Any || route.handlers.iter().any(|(m, _)| *m == Method::Any) {
            return Err(RouteError::RedundantMethod {
                method,
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    /// Freeze the table: apply the priority sort when enabled.
    pub(crate) fn finalize(&mut self) {
        if self.priority {
            self.sort_priority();
        }
        // Indices are stale after sorting and unused while serving.
        self.by_pattern.clear();
    }

    fn sort_priority(&mut self) {
        self.routes.sort_by(|a, b| {
            let (pa, pb) = (&a.pattern, &b.pattern);
            pb.is_exact()
                .cmp(&pa.is_exact())
                .then_with(|| pb.literal_prefix().len().cmp(&pa.literal_prefix().len()))
                .then_with(|| pa.has_params().cmp(&pb.has_params()))
        });
    }

    /// Match a normalized request path and method against the table.
    pub fn match_path(&self, path: &str, method: &axum::http::Method) -> RouteMatch<'_> {
        for route in &self.routes {
            let Some(slugs) = route.pattern.matches(path) else {
                continue;
            };
            return match route.handler_for(method) {
                Some(handler) => RouteMatch::Found { handler, slugs },
                None => RouteMatch::MethodNotAllowed {
                    allow: route.methods(),
                },
            };
        }
        RouteMatch::NotFound
    }

    /// Route order as displayed in logs and pinned by tests.
    pub fn describe_routes(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.pattern.to_string()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
