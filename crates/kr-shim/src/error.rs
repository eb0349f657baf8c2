//! Error type for the shim binary (spec.md §7): everything here is fatal to
//! one proxied connection, never retried — `ssh` itself owns retry policy
//! for its `ProxyCommand`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("usage: kr-shim <host> <port>")]
    BadUsage,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
