//! Virtual-host HTTP routing with durable server-side sessions.
//!
//! A server owns one domain and any number of subhosts, each with its own
//! route table (`:slug`/`:file` patterns, exact/prefix/blind routes,
//! optional priority ordering, per-route timeouts). Handlers start a
//! [`Session`] to get exclusive, concurrency-safe access to per-client
//! state persisted in a TTL-scoped durable store, with double-submit CSRF
//! tokens bound to the session lifecycle.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{Method, RouteError, Subhost};
pub use session::{
    MemorySessionStore, RedisSessionStore, Session, SessionError, SessionManager, SessionStore,
};
