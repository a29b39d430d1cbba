//! Service registration in the coordination store.
//!
//! # Data Flow
//! ```text
//! register():
//!     grant lease(ttl) → put endpoint(key, lease) → keepalive consumer task
//!
//! keepalive consumer:
//!     renewal ack → liveness only
//!     stream end  → RegistrationLost (reported, never retried)
//!
//! unregister():
//!     stop consumer → delete endpoint + revoke lease (both attempted)
//! ```
//!
//! # Design Decisions
//! - One mutex guards the active registration; nothing else touches lease state
//! - Keys are deterministic: `<service>/<host>:<port>`
//! - A lease that was granted but never attached is left to expire, not revoked

pub mod etcd;
pub mod key;
pub mod manager;
pub mod memory;
pub mod store;

pub use etcd::EtcdStore;
pub use key::{listen_addr, service_addr, service_key};
pub use manager::{
    LeaseLoss, Registration, RegistrationError, RegistrationLost, RegistrationManager,
    RegistrationTimeouts, UnregistrationError,
};
pub use memory::MemoryStore;
pub use store::{CoordinationStore, Endpoint, LeaseId, LeaseRenewal, RenewalStream, StoreError};
