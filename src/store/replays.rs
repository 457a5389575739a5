//! Race result archive, one record per finished race

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::store::{JsonDir, StoreError};
use crate::ws::protocol::RaceResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceReplay {
    pub id: Uuid,
    pub room_id: Uuid,
    pub track_id: String,
    pub lap_count: u32,
    pub recorded_at: u64,
    pub results: Vec<RaceResult>,
}

#[derive(Clone)]
pub struct ReplayStore {
    dir: JsonDir,
}

impl ReplayStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = JsonDir::open(data_dir.join("replays")).await?;
        Ok(Self { dir })
    }

    pub async fn save(&self, replay: &RaceReplay) -> Result<(), StoreError> {
        self.dir.write(&replay.id.simple().to_string(), replay).await
    }

    pub async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        self.dir.list_keys().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<RaceReplay>, StoreError> {
        self.dir.read(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::temp_data_dir;
    use crate::util::time::unix_millis;

    #[tokio::test]
    async fn saved_replays_are_listed_and_readable() {
        let store = ReplayStore::open(&temp_data_dir("replays")).await.unwrap();
        let replay = RaceReplay {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            track_id: "t1".to_string(),
            lap_count: 3,
            recorded_at: unix_millis(),
            results: Vec::new(),
        };
        store.save(&replay).await.unwrap();

        let ids = store.list_ids().await.unwrap();
        assert_eq!(ids.len(), 1);
        let loaded = store.get(&ids[0]).await.unwrap().expect("replay exists");
        assert_eq!(loaded.id, replay.id);
        assert_eq!(loaded.track_id, "t1");
    }
}
