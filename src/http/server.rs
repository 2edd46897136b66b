//! HTTP server setup and serving loop.
//!
//! # Responsibilities
//! - Own the subhost route tables during registration and freeze them
//!   before serving
//! - Create the Axum router (catch-all into the dispatcher)
//! - Wire up middleware (request tracing)
//! - Spawn the session purge sweep
//! - Serve with graceful shutdown, bounded by the configured grace period

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::http::dispatch::{dispatch, AppState};
use crate::lifecycle::{shutdown_signal, Shutdown};
use crate::routing::table::Subhost;
use crate::session::{SessionManager, SessionStore};

/// The HTTP server: configuration, subhost route tables, session manager.
pub struct HttpServer {
    config: ServerConfig,
    sessions: SessionManager,
    subhosts: HashMap<String, Subhost>,
}

impl HttpServer {
    /// Create a server over the given durable store.
    pub fn new(config: ServerConfig, store: Arc<dyn SessionStore>) -> Self {
        let sessions = SessionManager::new(config.session.clone(), config.csrf.clone(), store);
        Self {
            config,
            sessions,
            subhosts: HashMap::new(),
        }
    }

    /// Registration surface for the named subhost, created on first use.
    ///
    /// Names carry the subdomain fragment with its trailing dot
    /// (`"app."`); the empty string addresses the apex domain.
    pub fn subhost(&mut self, name: &str) -> &mut Subhost {
        self.subhosts
            .entry(name.to_string())
            .or_insert_with(|| Subhost::new(name))
    }

    pub fn session_manager(&self) -> SessionManager {
        self.sessions.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Freeze the route tables: apply priority sorts, make them immutable
    /// and lock-free for the serving path.
    fn freeze(&mut self) -> AppState {
        let mut subhosts = HashMap::new();
        for (name, mut subhost) in self.subhosts.drain() {
            subhost.finalize();
            subhosts.insert(name, Arc::new(subhost));
        }
        AppState {
            domain: self.config.domain.name.to_ascii_lowercase(),
            subhosts: Arc::new(subhosts),
            sessions: self.sessions.clone(),
        }
    }

    /// Build the Axum router: every path funnels into the dispatcher.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until a process signal triggers graceful shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let shutdown = Arc::new(Shutdown::new());
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.trigger();
            });
        }
        self.run_until(listener, shutdown).await
    }

    /// Run the server until the given coordinator fires.
    ///
    /// On shutdown the listener stops accepting; in-flight handlers get up
    /// to the configured grace period before the serve loop is abandoned.
    pub async fn run_until(
        mut self,
        listener: TcpListener,
        shutdown: Arc<Shutdown>,
    ) -> Result<(), std::io::Error> {
        let state = self.freeze();
        let addr = listener.local_addr()?;

        let route_count: usize = state.subhosts.values().map(|s| s.route_count()).sum();
        tracing::info!(
            address = %addr,
            domain = %state.domain,
            subhosts = state.subhosts.len(),
            routes = route_count,
            "HTTP server starting"
        );
        for subhost in state.subhosts.values() {
            for route in subhost.describe_routes() {
                tracing::debug!(subhost = subhost.name(), route = %route, "Route registered");
            }
        }

        self.sessions.spawn_purge(shutdown.subscribe());

        let app = Self::build_router(state).into_make_service_with_connect_info::<SocketAddr>();

        let grace = Duration::from_secs(self.config.shutdown.grace_secs);
        let mut graceful_rx = shutdown.subscribe();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = graceful_rx.recv().await;
            })
            .into_future();

        let mut force_rx = shutdown.subscribe();
        tokio::select! {
            result = serve => result?,
            _ = async move {
                let _ = force_rx.recv().await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(
                    grace_secs = self.config.shutdown.grace_secs,
                    "Grace period elapsed, forcing shutdown"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
