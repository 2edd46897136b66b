//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     Subhost::route / route_exact / route_blind
//!     → pattern.rs (validate, compile :slug/:file to regex)
//!     → table.rs (duplicate/method/exactness validation)
//!     → finalize: optional priority sort → frozen, immutable table
//!
//! Per request:
//!     dispatcher resolves subhost
//!     → table.rs match_path (first structural match wins)
//!     → Found (handler + path slugs) | MethodNotAllowed | NotFound
//! ```
//!
//! # Design Decisions
//! - Tables compiled at startup, immutable at runtime
//! - Literal patterns never hit the regex engine on the hot path
//! - Deterministic: same input always matches the same route
//! - First match wins (registration order, or priority order when enabled)

pub mod pattern;
pub mod route;
pub mod table;

pub use route::{Method, Route, RouteError, RouteHandler};
pub use table::{RouteMatch, Subhost};
