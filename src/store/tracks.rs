//! Track persistence with an in-memory cache for the room hot path

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::store::{JsonDir, StoreError};
use crate::track::{default_track, Track, DEFAULT_TRACK_ID};
use crate::util::time::unix_millis;
use crate::ws::protocol::TrackSummary;

#[derive(Clone)]
pub struct TrackStore {
    dir: JsonDir,
    cache: Arc<DashMap<String, Track>>,
}

impl TrackStore {
    /// Open the collection and warm the cache; the built-in default track
    /// is always present and never hits the disk.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = JsonDir::open(data_dir.join("tracks")).await?;
        let cache = Arc::new(DashMap::new());

        let loaded = dir.load_all::<Track>().await?;
        let count = loaded.len();
        for (key, track) in loaded {
            cache.insert(key, track);
        }
        let builtin = default_track();
        cache.entry(builtin.id.clone()).or_insert(builtin);

        info!(tracks = count, "track store loaded");
        Ok(Self { dir, cache })
    }

    pub fn is_protected(id: &str) -> bool {
        id == DEFAULT_TRACK_ID
    }

    pub fn get(&self, id: &str) -> Option<Track> {
        self.cache.get(id).map(|t| t.clone())
    }

    /// The requested track, or the built-in default when missing
    pub fn get_or_default(&self, id: Option<&str>) -> Track {
        id.and_then(|id| self.get(id)).unwrap_or_else(default_track)
    }

    pub fn summaries(&self) -> Vec<TrackSummary> {
        let mut list: Vec<TrackSummary> = self
            .cache
            .iter()
            .map(|entry| TrackSummary {
                id: entry.id.clone(),
                name: entry.name.clone(),
                author: entry.author.clone(),
                difficulty: entry.difficulty,
                default_lap_count: entry.default_lap_count,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Persist a track (editor elements already stripped by the caller)
    pub async fn upsert(&self, mut track: Track) -> Result<Track, StoreError> {
        track.updated_at = unix_millis();
        if track.created_at == 0 {
            track.created_at = track.updated_at;
        }
        self.dir.write(&track.id, &track).await?;
        self.cache.insert(track.id.clone(), track.clone());
        Ok(track)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if Self::is_protected(id) {
            return Err(StoreError::Protected);
        }
        let removed = self.cache.remove(id).is_some();
        let on_disk = self.dir.delete(id).await?;
        Ok(removed || on_disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::temp_data_dir;

    #[tokio::test]
    async fn default_track_is_always_available_and_protected() {
        let store = TrackStore::open(&temp_data_dir("tracks-default")).await.unwrap();
        assert!(store.get(DEFAULT_TRACK_ID).is_some());
        assert!(matches!(
            store.delete(DEFAULT_TRACK_ID).await,
            Err(StoreError::Protected)
        ));
    }

    #[tokio::test]
    async fn upsert_then_reload_round_trips() {
        let root = temp_data_dir("tracks-reload");
        {
            let store = TrackStore::open(&root).await.unwrap();
            let mut track = default_track();
            track.id = "custom-1".to_string();
            track.name = "Custom".to_string();
            store.upsert(track).await.unwrap();
        }
        let store = TrackStore::open(&root).await.unwrap();
        let track = store.get("custom-1").expect("persisted track");
        assert_eq!(track.name, "Custom");
        assert!(track.created_at > 0);
    }

    #[tokio::test]
    async fn missing_track_falls_back_to_default() {
        let store = TrackStore::open(&temp_data_dir("tracks-fallback")).await.unwrap();
        let track = store.get_or_default(Some("nope"));
        assert_eq!(track.id, DEFAULT_TRACK_ID);
        let track = store.get_or_default(None);
        assert_eq!(track.id, DEFAULT_TRACK_ID);
    }
}
