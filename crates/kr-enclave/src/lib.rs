//! # kr-enclave
//!
//! Request lifecycle orchestration (spec.md §4.5): dispatch, alert/fail
//! timeouts, the inbound reader loop, the no-op heartbeat, host-key binding
//! for signature requests, and profile caching. Everything upstream of this
//! crate (`kr-agent`, `kr-control`) talks to a paired phone exclusively
//! through [`Enclave`].

mod enclave;
mod error;
mod state;

pub use enclave::Enclave;
pub use error::EnclaveError;
pub use state::SessionIdKey;
