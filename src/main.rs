//! Service harness binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── RunGroup ─────────────────────────┐
//!                 │                                                           │
//!   RPC clients ──┼─▶ RpcServer ──register/unregister──▶ RegistrationManager ─┼──▶ etcd
//!                 │                                           │ keepalive     │
//!   Prometheus ───┼─▶ MetricsServer                           ▼               │
//!                 │                                     lease renewals        │
//!   SIGINT/TERM ──┼─▶ SignalWatcher                                           │
//!                 │                                                           │
//!                 │   first actor to return ─▶ interrupt all ─▶ join ─▶ exit  │
//!                 └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Exit status: 0 orderly shutdown, 1 runtime failure, 2 startup failure,
//! 3 registration lost.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tonic::service::Routes;

use service_harness::config::{load_config, resolve_config_path};
use service_harness::lifecycle::group::EXIT_STARTUP;
use service_harness::lifecycle::startup::{build_group, connect_store, exit_status};
use service_harness::observability::{init_logging, metrics};

#[derive(Parser)]
#[command(name = "service-harness")]
#[command(about = "Runs a discoverable RPC service with metrics and signal handling", long_about = None)]
struct Cli {
    /// Config file; overrides the --env lookup.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment whose config/<env>/conf.toml is loaded.
    #[arg(long, env = "SERVICE_ENV", default_value = "test")]
    env: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let path = resolve_config_path(cli.config.as_deref(), &cli.env);
    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::from(EXIT_STARTUP);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %cli.env,
        config = %path.display(),
        "service-harness starting"
    );
    tracing::debug!(?config, "Configuration loaded");

    let metrics_handle = if config.metrics.enabled {
        match metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install metrics recorder");
                return ExitCode::from(EXIT_STARTUP);
            }
        }
    } else {
        None
    };

    let store = match connect_store(&config.registry).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, endpoints = ?config.registry.endpoints, "Cannot reach coordination store");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let group = build_group(&config, store, Routes::default(), metrics_handle);
    let result = group.run().await;

    match &result {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(e) => tracing::error!(error = %e, "Service stopped on error"),
    }
    ExitCode::from(exit_status(&result))
}
