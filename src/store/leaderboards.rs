//! Per-track lap-time leaderboards

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::store::{JsonDir, StoreError};
use crate::util::time::unix_millis;

/// Entries kept per track
pub const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub time_ms: u64,
    pub recorded_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub track_id: String,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    fn empty(track_id: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// Insert a lap time, keeping one entry per nickname (case-insensitive),
    /// ascending order, and the size cap. Returns false when the submission
    /// did not improve on the player's existing entry.
    fn insert(&mut self, nickname: &str, time_ms: u64) -> bool {
        let lowered = nickname.to_lowercase();
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.nickname.to_lowercase() == lowered)
        {
            if self.entries[pos].time_ms <= time_ms {
                return false;
            }
            self.entries.remove(pos);
        }

        self.entries.push(LeaderboardEntry {
            nickname: nickname.to_string(),
            time_ms,
            recorded_at: unix_millis(),
        });
        self.entries.sort_by_key(|e| e.time_ms);
        self.entries.truncate(MAX_ENTRIES);
        self.entries
            .iter()
            .any(|e| e.nickname.to_lowercase() == lowered)
    }
}

#[derive(Clone)]
pub struct LeaderboardStore {
    dir: JsonDir,
    cache: Arc<DashMap<String, Leaderboard>>,
}

impl LeaderboardStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = JsonDir::open(data_dir.join("leaderboards")).await?;
        let cache = Arc::new(DashMap::new());
        for (key, board) in dir.load_all::<Leaderboard>().await? {
            cache.insert(key, board);
        }
        Ok(Self { dir, cache })
    }

    pub fn get(&self, track_id: &str) -> Leaderboard {
        self.cache
            .get(track_id)
            .map(|b| b.clone())
            .unwrap_or_else(|| Leaderboard::empty(track_id))
    }

    /// Submit a lap time; persists only when the board changed
    pub async fn submit(
        &self,
        track_id: &str,
        nickname: &str,
        time_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut board = self.get(track_id);
        if !board.insert(nickname, time_ms) {
            return Ok(false);
        }
        self.dir.write(track_id, &board).await?;
        self.cache.insert(track_id.to_string(), board);
        Ok(true)
    }
}
