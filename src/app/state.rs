//! Application state shared across routes

use dashmap::DashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::game::SessionRegistry;
use crate::rooms::RoomManager;
use crate::store::{LeaderboardStore, ReplayStore, StoreError, TrackStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub rooms: Arc<RoomManager>,
    pub tracks: TrackStore,
    pub leaderboards: LeaderboardStore,
    pub replays: ReplayStore,
}

impl AppState {
    /// Open the stores and wire the room manager
    pub async fn init(config: Config) -> Result<Self, StoreError> {
        let config = Arc::new(config);

        let tracks = TrackStore::open(&config.data_dir).await?;
        let leaderboards = LeaderboardStore::open(&config.data_dir).await?;
        let replays = ReplayStore::open(&config.data_dir).await?;

        let registry: SessionRegistry = Arc::new(DashMap::new());
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            tracks.clone(),
            Some(leaderboards.clone()),
            Some(replays.clone()),
        ));

        Ok(Self {
            config,
            registry,
            rooms,
            tracks,
            leaderboards,
            replays,
        })
    }
}
