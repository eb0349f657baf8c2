//! # kr-agent
//!
//! SSH-agent wire protocol adapter (spec.md §4.6): accepts connections on a
//! local socket, serves `List`/`Sign`/`SignWithFlags` against the enclave
//! and the cached paired profile, and forwards every other operation
//! (`Add`, `Remove`, `Lock`, `Unlock`, `Extension`) to the upstream agent
//! named by `SSH_AUTH_SOCK` — the phone-backed identity is append-only.

mod agent;
mod error;
mod session_sig;
mod upstream;
mod wire;

pub use agent::AgentServer;
pub use error::AgentError;
