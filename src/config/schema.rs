//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the harness.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HarnessConfig {
    /// Identity and listener of the RPC service.
    pub service: ServiceConfig,

    /// Coordination store connection and call budgets.
    pub registry: RegistryConfig,

    /// Metrics exposition endpoint.
    pub metrics: MetricsConfig,

    /// Shutdown bounds.
    pub shutdown: ShutdownConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

/// Service identity and RPC listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Logical service name, used as the discovery key prefix.
    pub name: String,

    /// Host advertised in the discovery entry. Deployment-fixed, never detected.
    pub host: String,

    /// RPC port. The listener binds it on all interfaces.
    pub port: u16,

    /// Lease time-to-live in seconds.
    pub ttl_secs: u64,

    /// Accept plain HTTP/1.1 requests alongside HTTP/2.
    pub accept_http1: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service/thumbs".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            ttl_secs: 10,
            accept_http1: false,
        }
    }
}

/// Which coordination store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Etcd,
    /// In-process store; entries are only visible inside this process.
    Memory,
}

/// Coordination store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// Store endpoints (e.g. `"127.0.0.1:2379"`).
    pub endpoints: Vec<String>,

    /// Connection establishment timeout in seconds.
    pub dial_timeout_secs: u64,

    /// Budget for each store call made while registering, in milliseconds.
    pub request_timeout_ms: u64,

    /// Budget for the whole unregister sequence, in seconds.
    pub unregister_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Etcd,
            endpoints: vec!["127.0.0.1:2379".to_string()],
            dial_timeout_secs: 2,
            request_timeout_ms: 1000,
            unregister_timeout_secs: 5,
        }
    }
}

impl RegistryConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_secs(self.unregister_timeout_secs)
    }
}

/// Metrics exposition settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Run the metrics endpoint as part of the group.
    pub enabled: bool,

    /// Bind address of the metrics endpoint (e.g. `"0.0.0.0:9091"`).
    pub bind_address: String,

    /// How long shutdown may take before it is abandoned with a warning.
    pub shutdown_timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:9091".to_string(),
            shutdown_timeout_secs: 2,
        }
    }
}

impl MetricsConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Shutdown bounds for the RPC server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time in-flight calls get to finish before the hard stop.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: HarnessConfig = toml::from_str("[service]\nport = 9000\n").unwrap();
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.service.name, "service/thumbs");
        assert_eq!(config.service.ttl_secs, 10);
        assert_eq!(config.registry.backend, RegistryBackend::Etcd);
        assert_eq!(config.registry.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.registry.unregister_timeout(), Duration::from_secs(5));
        assert_eq!(config.metrics.shutdown_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_backend_and_format_parse_lowercase() {
        let config: HarnessConfig = toml::from_str(
            r#"
            [registry]
            backend = "memory"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
