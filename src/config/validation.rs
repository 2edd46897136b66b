//! Semantic configuration validation.
//!
//! Serde handles the syntactic layer; this pass checks the invariants a
//! parsed config must still satisfy, collecting every violation instead
//! of stopping at the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::ServerConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("domain.name cannot be empty")]
    EmptyDomain,

    #[error("listener.bind_address cannot be empty")]
    EmptyBindAddress,

    #[error("session.cookie_name cannot be empty")]
    EmptyCookieName,

    #[error("session.cookie_name contains invalid characters: {0}")]
    InvalidCookieName(String),

    #[error("session.ttl_secs must be greater than zero")]
    ZeroTtl,

    #[error("session.purge_interval_secs must be greater than zero")]
    ZeroPurgeInterval,

    #[error("csrf.header_name cannot be empty")]
    EmptyCsrfHeader,

    #[error("csrf.trusted_origins entry is not a valid origin: {0}")]
    InvalidTrustedOrigin(String),
}

/// Validate a parsed configuration, returning all violations.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.domain.name.is_empty() {
        errors.push(ValidationError::EmptyDomain);
    }
    if config.listener.bind_address.is_empty() {
        errors.push(ValidationError::EmptyBindAddress);
    }

    if config.session.cookie_name.is_empty() {
        errors.push(ValidationError::EmptyCookieName);
    } else if !config
        .session
        .cookie_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(ValidationError::InvalidCookieName(
            config.session.cookie_name.clone(),
        ));
    }
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::ZeroTtl);
    }
    if config.session.purge_interval_secs == 0 {
        errors.push(ValidationError::ZeroPurgeInterval);
    }

    if config.csrf.header_name.is_empty() {
        errors.push(ValidationError::EmptyCsrfHeader);
    }
    for origin in &config.csrf.trusted_origins {
        if Url::parse(origin).is_err() {
            errors.push(ValidationError::InvalidTrustedOrigin(origin.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_violations() {
        let mut config = ServerConfig::default();
        config.domain.name.clear();
        config.session.ttl_secs = 0;
        config.session.cookie_name = "bad name".to_string();
        config.csrf.trusted_origins = vec!["not a url".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}
