//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry, lifecycle, rpc
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms through the `metrics` facade)
//!
//! exporter.rs:
//!     PrometheusHandle → GET /metrics (pull), GET /health
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metric calls are no-ops until a recorder is installed, so library
//!   users and tests pay nothing

pub mod exporter;
pub mod logging;
pub mod metrics;

pub use exporter::MetricsServer;
pub use logging::init_logging;
