//! In-memory `PairingStore` for tests. Same observable contract as
//! [`crate::fs_store::FilesystemStore`]: absence is `NotPresent`, nothing
//! is ever corrupt because nothing is ever serialized to bytes.

use std::sync::Mutex;

use async_trait::async_trait;
use kr_common::model::{PairingSecret, Profile};

use crate::{PairingStore, PersistError};

#[derive(Default)]
struct Inner {
    pairing: Option<PairingSecret>,
    me: Option<Profile>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PairingStore for MemoryStore {
    async fn save_pairing(&self, secret: &PairingSecret) -> Result<(), PersistError> {
        self.inner.lock().unwrap().pairing = Some(secret.clone());
        Ok(())
    }

    async fn load_pairing(&self) -> Result<PairingSecret, PersistError> {
        self.inner.lock().unwrap().pairing.clone().ok_or(PersistError::NotPresent)
    }

    async fn clear_pairing(&self) -> Result<(), PersistError> {
        self.inner.lock().unwrap().pairing = None;
        Ok(())
    }

    async fn save_me(&self, profile: &Profile) -> Result<(), PersistError> {
        self.inner.lock().unwrap().me = Some(profile.clone());
        Ok(())
    }

    async fn load_me(&self) -> Result<Profile, PersistError> {
        self.inner.lock().unwrap().me.clone().ok_or(PersistError::NotPresent)
    }

    async fn clear_me(&self) -> Result<(), PersistError> {
        self.inner.lock().unwrap().me = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryStore::new();
        let secret = kr_pairing::generate("laptop");
        store.save_pairing(&secret).await.unwrap();
        assert_eq!(store.load_pairing().await.unwrap().queue_uuid, secret.queue_uuid);
    }

    #[tokio::test]
    async fn clear_then_load_is_not_present() {
        let store = MemoryStore::new();
        let secret = kr_pairing::generate("laptop");
        store.save_pairing(&secret).await.unwrap();
        store.clear_pairing().await.unwrap();
        assert!(matches!(store.load_pairing().await, Err(PersistError::NotPresent)));
    }
}
