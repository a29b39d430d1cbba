//! RPC server actor.
//!
//! # State machine
//! ```text
//! Idle ──register ok──▶ Serving ──interrupt / lease lost──▶ Draining ──▶ Stopped
//!   │                                                                       ▲
//!   └────────── bind / register failure ────────────────────────────────────┘
//! ```
//!
//! # Design Decisions
//! - The endpoint is published before the first connection is accepted
//! - Unregister runs at the start of the drain, before the hard stop
//! - The drain is bounded; the hard stop always happens
//! - A lost lease drains like an interrupt, then fails the actor
//! - Every call gets a trace span and is counted in the metrics

pub mod server;

pub use server::{RpcServer, RpcServerConfig, RpcState};
