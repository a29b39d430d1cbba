//! Runtime harness for a discoverable network service.
//!
//! Registers the process in a coordination store under a renewable lease and
//! runs the service's independent loops (RPC server, metrics exporter, signal
//! watcher) as one group that starts and stops together.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod rpc;

pub use config::schema::HarnessConfig;
pub use lifecycle::{Actor, ActorError, RunGroup, Shutdown};
pub use registry::{CoordinationStore, Registration, RegistrationManager};
pub use rpc::RpcServer;
