//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the upstream target and bind address
//! - Validate value ranges (timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::http::request::{TargetError, UpstreamTarget};

/// A single semantic problem with the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream.target: {0}")]
    Target(#[from] TargetError),
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),
    #[error("listener.tls.{field} must not be empty")]
    TlsPath { field: &'static str },
    #[error("timeouts.{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(err) = config.upstream.target.parse::<UpstreamTarget>() {
        errors.push(ValidationError::Target(err));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::TlsPath { field: "cert_path" });
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::TlsPath { field: "key_path" });
        }
    }

    for (field, value) in [
        ("connect_secs", config.timeouts.connect_secs),
        ("idle_secs", config.timeouts.idle_secs),
        ("shutdown_grace_secs", config.timeouts.shutdown_grace_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout { field });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
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
    use crate::config::schema::TlsConfig;

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.upstream.target = "http://up.example".to_string();
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn empty_target_is_rejected() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::Target(TargetError::Empty)));
        assert_eq!(errors[0].to_string(), "upstream.target: empty target url");
    }

    #[test]
    fn reports_every_problem() {
        let mut config = valid();
        config.upstream.target = "ftp://files.example".to_string();
        config.listener.bind_address = "localhost".to_string();
        config.listener.tls = Some(TlsConfig::combined(""));
        config.timeouts.connect_secs = 0;
        config.timeouts.shutdown_grace_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6, "{errors:?}");
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = valid();
        config.observability.metrics_address = "nope".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::MetricsAddress(_)));
    }
}
