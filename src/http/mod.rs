//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → server.rs (axum catch-all)
//!     → dispatch.rs (subhost → route table → handler)
//!         timeout / panic recovery / cookie drain / metrics
//!     → handler (request.rs helpers, session via extensions)
//! ```

pub mod cookie;
pub mod dispatch;
pub mod request;
pub mod server;

pub use cookie::CookieJar;
pub use dispatch::RouteDeadline;
pub use request::{client_ip, path_slug, path_slugs, sessions, PathSlugs};
pub use server::HttpServer;
