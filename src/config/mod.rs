//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config/<env>/conf.toml (or --config <path>)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → HarnessConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Every section has defaults so a minimal file is enough
//! - Validation collects all problems instead of stopping at the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, resolve_config_path, ConfigError};
pub use schema::{
    HarnessConfig, LogFormat, LoggingConfig, MetricsConfig, RegistryBackend, RegistryConfig,
    ServiceConfig, ShutdownConfig,
};
