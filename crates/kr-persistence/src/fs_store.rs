//! Filesystem-backed `PairingStore`: `<state_dir>/pairing.json` and
//! `<state_dir>/me.json`, written atomically and owner-only (spec.md §4.4).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kr_common::model::{PairingSecret, Profile};

use crate::{PairingStore, PersistError};

const OWNER_ONLY: u32 = 0o700;

pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// `dir` is typically `~/.kr`. Created (owner-only) if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(OWNER_ONLY))?;
        Ok(Self { dir })
    }

    fn pairing_path(&self) -> PathBuf {
        self.dir.join("pairing.json")
    }

    fn me_path(&self) -> PathBuf {
        self.dir.join("me.json")
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename over the destination, fsync the directory. A crash at any
/// point before the rename leaves the old file (or no file) intact; a crash
/// after leaves the new file intact. Never a half-written `path`.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = path.parent().expect("path has a parent directory");
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().unwrap().to_string_lossy(),
        std::process::id()
    ));

    {
        let mut tmp = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600) // owner read/write only
            .open(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Ok(dir_handle) = std::fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(PersistError::NotPresent),
        Err(e) => return Err(PersistError::Io(e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| PersistError::Corrupt(e.to_string()))
}

#[async_trait]
impl PairingStore for FilesystemStore {
    async fn save_pairing(&self, secret: &PairingSecret) -> Result<(), PersistError> {
        let path = self.pairing_path();
        let bytes = serde_json::to_vec_pretty(secret).expect("PairingSecret always serializes");
        let path2 = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path2, &bytes))
            .await
            .expect("blocking write task panicked")?;
        Ok(())
    }

    async fn load_pairing(&self) -> Result<PairingSecret, PersistError> {
        let path = self.pairing_path();
        tokio::task::spawn_blocking(move || read_json(&path))
            .await
            .expect("blocking read task panicked")
    }

    async fn clear_pairing(&self) -> Result<(), PersistError> {
        match std::fs::remove_file(self.pairing_path()) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn save_me(&self, profile: &Profile) -> Result<(), PersistError> {
        let path = self.me_path();
        let bytes = serde_json::to_vec_pretty(profile).expect("Profile always serializes");
        let path2 = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path2, &bytes))
            .await
            .expect("blocking write task panicked")?;
        Ok(())
    }

    async fn load_me(&self) -> Result<Profile, PersistError> {
        let path = self.me_path();
        tokio::task::spawn_blocking(move || read_json(&path))
            .await
            .expect("blocking read task panicked")
    }

    async fn clear_me(&self) -> Result<(), PersistError> {
        match std::fs::remove_file(self.me_path()) {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}
