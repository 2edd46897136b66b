//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use subserv::config::ServerConfig;
use subserv::session::{MemorySessionStore, SessionManager};
use subserv::{HttpServer, Shutdown};

#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
    pub store: Arc<MemorySessionStore>,
    pub sessions: SessionManager,
}

/// Spawn a server over an in-memory store on an ephemeral port.
///
/// The config serves the "localhost" domain so tests can address
/// subhosts as `app.localhost` etc.; `wire` registers the routes.
pub async fn spawn_server<F>(mut config: ServerConfig, wire: F) -> TestServer
where
    F: FnOnce(&mut HttpServer),
{
    config.domain.name = "localhost".to_string();

    let store = Arc::new(MemorySessionStore::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let mut server = HttpServer::new(config, store.clone());
    wire(&mut server);
    let sessions = server.session_manager();

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run_until(listener, server_shutdown).await.unwrap();
    });

    // Give the listener a moment to start serving.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        shutdown,
        store,
        sessions,
    }
}

/// Client with pinned DNS for the test subhosts and a cookie store.
pub fn client(addr: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .resolve("localhost", addr)
        .resolve("app.localhost", addr)
        .resolve("unknown.localhost", addr)
        .resolve("other.net", addr)
        .cookie_store(true)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll a condition until it holds or the wait times out.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
