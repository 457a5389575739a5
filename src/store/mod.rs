//! File-backed JSON collection stores
//!
//! One JSON file per entity under the data directory. Writes go through a
//! temp-file-then-rename so a crash never leaves a torn file, and a per-key
//! lock serializes concurrent writers. Reads on the hot path come from the
//! in-memory caches populated at startup.

pub mod leaderboards;
pub mod replays;
pub mod tracks;

pub use leaderboards::{Leaderboard, LeaderboardEntry, LeaderboardStore};
pub use replays::{RaceReplay, ReplayStore};
pub use tracks::TrackStore;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("entity is protected")]
    Protected,
}

/// A directory of `<key>.json` entities with atomic writes
#[derive(Clone)]
pub struct JsonDir {
    root: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl JsonDir {
    pub async fn open(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: Arc::new(DashMap::new()),
        })
    }

    fn check_key(key: &str) -> Result<(), StoreError> {
        let ok = !key.is_empty()
            && key.len() <= 64
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if ok {
            Ok(())
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomic write: serialize, write to a temp file, rename over the target
    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        Self::check_key(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.root.join(format!("{key}.json.tmp"));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, self.path_for(key)).await?;
        Ok(())
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        Self::check_key(key)?;
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Self::check_key(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of every entity currently on disk
    pub async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Load every entity, skipping (and logging) corrupt files
    pub async fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, StoreError> {
        let mut loaded = Vec::new();
        for key in self.list_keys().await? {
            match self.read::<T>(&key).await {
                Ok(Some(value)) => loaded.push((key, value)),
                Ok(None) => {}
                Err(error) => {
                    warn!(%key, %error, "skipping unreadable entity");
                }
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
pub(crate) fn temp_data_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("slipstream-test-{label}-{}", uuid::Uuid::new_v4()))
}
