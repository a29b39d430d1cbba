//! Configuration validation.
//!
//! Serde handles the syntax; this module checks value ranges and that the
//! sections agree with each other. All problems are reported together.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{HarnessConfig, RegistryBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `service.ttl_secs`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &HarnessConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }
    if config.service.host.trim().is_empty() {
        errors.push(ValidationError::new("service.host", "must not be empty"));
    }
    if config.service.port == 0 {
        errors.push(ValidationError::new("service.port", "must be between 1 and 65535"));
    }
    if config.service.ttl_secs == 0 {
        errors.push(ValidationError::new("service.ttl_secs", "must be greater than 0"));
    }

    if config.registry.backend == RegistryBackend::Etcd && config.registry.endpoints.is_empty() {
        errors.push(ValidationError::new(
            "registry.endpoints",
            "at least one endpoint is required for the etcd backend",
        ));
    }
    if config.registry.request_timeout_ms == 0 {
        errors.push(ValidationError::new("registry.request_timeout_ms", "must be greater than 0"));
    }
    if config.registry.unregister_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "registry.unregister_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.metrics.enabled {
        if config.metrics.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "metrics.bind_address",
                format!("'{}' is not a socket address", config.metrics.bind_address),
            ));
        }
        if config.metrics.shutdown_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "metrics.shutdown_timeout_secs",
                "must be greater than 0",
            ));
        }
    }

    if config.shutdown.drain_timeout_secs == 0 {
        errors.push(ValidationError::new("shutdown.drain_timeout_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
