//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! server. All types derive Serde traits for deserialization from config
//! files.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The top-level domain served; subhosts are resolved against it.
    pub domain: DomainConfig,

    /// Session pool and durable store settings.
    pub session: SessionConfig,

    /// CSRF token settings.
    pub csrf: CsrfConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Domain configuration.
///
/// Requests are accepted when the `Host` header ends with `name`; the
/// leading fragment (including its trailing dot) selects the subhost,
/// the empty fragment the apex.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Served domain (e.g., "example.com").
    pub name: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
        }
    }
}

/// Session pool and durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session cookie name.
    pub cookie_name: String,

    /// Session lifetime in seconds; refreshed on every start.
    pub ttl_secs: u64,

    /// Key prefix in the durable store (keys are "{prefix}:{sid}").
    pub remote_prefix: String,

    /// Interval of the expired-session purge sweep in seconds.
    pub purge_interval_secs: u64,

    /// Session cookie Max-Age in seconds; 0 scopes the cookie to the
    /// browser session.
    pub cookie_max_age_secs: u64,

    /// Set the Secure attribute on session and CSRF cookies. Disable only
    /// for plain-HTTP development setups.
    pub cookie_secure: bool,

    /// Redis connection URL for the durable store.
    pub redis_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            ttl_secs: 1800,
            remote_prefix: "sess".to_string(),
            purge_interval_secs: 60,
            cookie_max_age_secs: 0,
            cookie_secure: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// CSRF configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Request header carrying the echoed token.
    pub header_name: String,

    /// Script-readable cookie delivering the token.
    pub cookie_name: String,

    /// Origins accepted by strict verification
    /// (e.g. "https://app.example.com"). Empty means strict verification
    /// rejects everything.
    pub trusted_origins: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header_name: "X-CSRF-Token".to_string(),
            cookie_name: "csrf_token".to_string(),
            trusted_origins: Vec::new(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds to wait for in-flight handlers after the signal before
    /// forcing exit.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
