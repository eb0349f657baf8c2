//! # kr-control
//!
//! The local HTTP control surface (spec.md §4.7) the CLI drives to pair,
//! unpair, inspect the paired identity, and pass enclave requests through.
//! Served over a Unix domain socket only — never TCP, never a remote
//! surface.

mod error;
mod routes;
mod server;

pub use error::ControlError;
pub use routes::PairingOptions;
pub use server::{build_router, serve_unix, AppState};
