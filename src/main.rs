//! Demo server: wires a small route set over the library.
//!
//! Serves the apex subhost of the configured domain with a session-backed
//! counter, login (session regeneration + CSRF issuance), a CSRF-guarded
//! mutation, and logout.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use subserv::config::{load_config, ServerConfig};
use subserv::http::{path_slug, sessions};
use subserv::routing::RouteError;
use subserv::session::RedisSessionStore;
use subserv::{HttpServer, Method, SessionError};

#[derive(Parser, Debug)]
#[command(name = "subserv", about = "Virtual-host HTTP server with durable sessions")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    subserv::observability::logging::init(&format!(
        "subserv={},tower_http=info",
        config.observability.log_level
    ));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        domain = %config.domain.name,
        session_ttl_secs = config.session.ttl_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => subserv::observability::metrics::init_metrics(addr),
            Err(err) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %err,
                "Failed to parse metrics address"
            ),
        }
    }

    let redis = deadpool_redis::Config::from_url(&config.session.redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let store = Arc::new(RedisSessionStore::new(redis));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let mut server = HttpServer::new(config, store);
    register_routes(&mut server)?;
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn register_routes(server: &mut HttpServer) -> Result<(), RouteError> {
    let apex = server.subhost("");
    apex.priority_routing();
    apex.route_exact(Method::Get, "/", 0, index)?;
    apex.route(Method::Get, "/hello/:slug", 5, hello)?;
    apex.route(Method::Get, "/count", 5, count)?;
    apex.route(Method::Post, "/login", 5, login)?;
    apex.route(Method::Post, "/profile", 5, update_profile)?;
    apex.route(Method::Post, "/logout", 5, logout)?;
    apex.route_blind(Method::Any, "/internal")?;
    Ok(())
}

async fn index(_req: Request<Body>) -> &'static str {
    "subserv demo\n"
}

async fn hello(req: Request<Body>) -> Response {
    let name = path_slug(&req, 0).unwrap_or("world").to_string();
    format!("hello {name}\n").into_response()
}

/// Session-backed visit counter.
async fn count(req: Request<Body>) -> Result<Response, SessionError> {
    let manager = sessions(&req).ok_or(SessionError::Detached)?;
    let mut session = manager.start(&req).await?;

    let n: i64 = session.get("count").unwrap_or(0);
    let mut keys = session.data();
    keys.insert("count".to_string(), json!(n + 1));
    session.write(keys)?;
    session.close();

    Ok(format!("count: {}\n", n + 1).into_response())
}

/// Rotate the session id on privilege change and hand out a CSRF token.
async fn login(req: Request<Body>) -> Result<Response, SessionError> {
    let manager = sessions(&req).ok_or(SessionError::Detached)?;
    let mut session = manager.start(&req).await?;

    session.regenerate()?;
    let mut keys = session.data();
    keys.insert("user".to_string(), json!("demo"));
    session.write(keys)?;
    let token = session.generate_csrf()?;
    session.close();

    Ok(format!("logged in; csrf token: {token}\n").into_response())
}

/// CSRF-guarded mutation.
async fn update_profile(req: Request<Body>) -> Result<Response, SessionError> {
    let manager = sessions(&req).ok_or(SessionError::Detached)?;
    let mut session = manager.start(&req).await?;

    if !session.verify_csrf(&req) {
        session.close();
        return Ok((StatusCode::FORBIDDEN, "CSRF verification failed").into_response());
    }

    let updates: i64 = session.get("profile_updates").unwrap_or(0);
    let mut keys = session.data();
    keys.insert("profile_updates".to_string(), json!(updates + 1));
    session.write(keys)?;
    session.close();

    Ok("profile updated\n".into_response())
}

async fn logout(req: Request<Body>) -> Result<Response, SessionError> {
    let manager = sessions(&req).ok_or(SessionError::Detached)?;
    let mut session = manager.start(&req).await?;
    session.destroy()?;
    Ok("logged out\n".into_response())
}
