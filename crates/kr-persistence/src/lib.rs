//! # kr-persistence
//!
//! Durable storage of `~/.kr/pairing.json` and `~/.kr/me.json` across daemon
//! restarts (spec.md §4.4). A `PairingStore` trait with a filesystem
//! implementation and an in-memory implementation for tests — two
//! interchangeable backends with identical observable semantics.

pub mod fs_store;
pub mod memory_store;

use async_trait::async_trait;
use kr_common::model::{PairingSecret, Profile};
use thiserror::Error;

pub use fs_store::FilesystemStore;
pub use memory_store::MemoryStore;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("not present")]
    NotPresent,
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract for durable pairing/profile storage. `save_pairing` must be
/// atomic with respect to crashes (spec.md §4.4): write a temp file, fsync,
/// rename over the destination.
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn save_pairing(&self, secret: &PairingSecret) -> Result<(), PersistError>;
    async fn load_pairing(&self) -> Result<PairingSecret, PersistError>;
    async fn clear_pairing(&self) -> Result<(), PersistError>;

    async fn save_me(&self, profile: &Profile) -> Result<(), PersistError>;
    async fn load_me(&self) -> Result<Profile, PersistError>;
    async fn clear_me(&self) -> Result<(), PersistError>;
}
