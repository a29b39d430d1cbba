//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Run (group.rs):
//!     spawn every actor's execute → first one returns → interrupt all → join rest
//!
//! Shutdown (shutdown.rs):
//!     latched trigger each actor turns its interrupt into
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → signal watcher returns → group shuts down
//!
//! Startup (startup.rs):
//!     config → store → registration manager → actors → exit code
//! ```
//!
//! # Design Decisions
//! - The first actor to finish decides the outcome of the whole group
//! - Interrupts are direct calls, there is no shared cancellation token
//! - Exit codes separate orderly shutdown from startup and runtime failures

pub mod group;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use group::{Actor, ActorError, RunGroup};
pub use shutdown::Shutdown;
pub use signals::SignalWatcher;
