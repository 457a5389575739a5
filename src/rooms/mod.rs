//! Room manager: creation, lookup by id and short code, session routing,
//! and idle garbage collection

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::room::{Room, RoomHandle, ROOM_IDLE_TIMEOUT_MS};
use crate::game::{RoomCommand, SessionRegistry};
use crate::store::{LeaderboardStore, ReplayStore, TrackStore};
use crate::util::time::unix_millis;
use crate::ws::protocol::{RoomInfo, RoomPhase, RoomSettings, ServerMsg};

/// Room codes avoid visually confusable characters (0/O, 1/I/L)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

/// How long a disconnected player keeps their seat
pub const PLAYER_DISCONNECT_TIMEOUT_MS: u64 = 10_000;
/// Idle GC sweep cadence
const GC_INTERVAL: Duration = Duration::from_secs(60);
/// Empty rooms younger than this are spared (the host may still be joining)
const EMPTY_ROOM_GRACE_MS: u64 = 60_000;

/// Why a join was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    NotFound,
    Full,
    Private,
    RaceInProgress,
}

impl JoinRejection {
    pub fn message(&self) -> &'static str {
        match self {
            JoinRejection::NotFound => "No such room",
            JoinRejection::Full => "Room is full",
            JoinRejection::Private => "Room is private",
            JoinRejection::RaceInProgress => "Race in progress",
        }
    }
}

pub struct RoomManager {
    rooms: Arc<DashMap<Uuid, RoomHandle>>,
    codes: Arc<DashMap<String, Uuid>>,
    session_rooms: Arc<DashMap<Uuid, Uuid>>,
    registry: SessionRegistry,
    tracks: TrackStore,
    leaderboards: Option<LeaderboardStore>,
    replays: Option<ReplayStore>,
}

impl RoomManager {
    pub fn new(
        registry: SessionRegistry,
        tracks: TrackStore,
        leaderboards: Option<LeaderboardStore>,
        replays: Option<ReplayStore>,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            codes: Arc::new(DashMap::new()),
            session_rooms: Arc::new(DashMap::new()),
            registry,
            tracks,
            leaderboards,
            replays,
        }
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.codes.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a room, spawn its actor, and join the host into it
    pub async fn create_room(
        &self,
        host: Uuid,
        nickname: String,
        color: Option<String>,
        settings: RoomSettings,
    ) -> Result<RoomHandle, &'static str> {
        if !settings.is_valid() {
            return Err("Invalid room settings");
        }

        // a player can only be in one room
        self.leave(host).await;

        let track = self.tracks.get_or_default(settings.track_id.as_deref());
        let id = Uuid::new_v4();
        let code = self.generate_code();

        let (room, handle) = Room::new(
            id,
            code.clone(),
            host,
            settings,
            track,
            self.registry.clone(),
            self.session_rooms.clone(),
            self.leaderboards.clone(),
            self.replays.clone(),
        );

        self.rooms.insert(id, handle.clone());
        self.codes.insert(code.clone(), id);
        self.spawn_room(room, id, code.clone());

        info!(room_id = %id, %code, host = %host, "room created");

        self.session_rooms.insert(host, id);
        let _ = handle
            .inbox
            .send(RoomCommand::Join {
                session_id: host,
                nickname,
                color,
            })
            .await;

        Ok(handle)
    }

    /// Run the room task with panic isolation: a crash in one room never
    /// takes the process down, members get told, and the indexes heal.
    fn spawn_room(&self, room: Room, id: Uuid, code: String) {
        let rooms = self.rooms.clone();
        let codes = self.codes.clone();
        let session_rooms = self.session_rooms.clone();
        let registry = self.registry.clone();

        let task = tokio::spawn(room.run());
        tokio::spawn(async move {
            if let Err(join_error) = task.await {
                if join_error.is_panic() {
                    warn!(room_id = %id, "room task panicked, shutting the room down");
                    let members: Vec<Uuid> = session_rooms
                        .iter()
                        .filter(|e| *e.value() == id)
                        .map(|e| *e.key())
                        .collect();
                    for session_id in members {
                        session_rooms.remove(&session_id);
                        if let Some(tx) = registry.get(&session_id) {
                            let _ = tx.send(ServerMsg::RoomLeft {
                                reason: "crash".to_string(),
                            });
                        }
                    }
                }
            }
            rooms.remove(&id);
            codes.remove(&code);
            info!(room_id = %id, "room removed from registry");
        });
    }

    /// Join by id or short code. Join-by-id into a private room is refused;
    /// the code is the invitation.
    pub async fn join_room(
        &self,
        session_id: Uuid,
        room_id: Option<Uuid>,
        code: Option<&str>,
        nickname: String,
        color: Option<String>,
    ) -> Result<RoomHandle, JoinRejection> {
        let (handle, via_code) = if let Some(code) = code {
            let code = code.trim().to_uppercase();
            let id = self
                .codes
                .get(&code)
                .map(|e| *e.value())
                .ok_or(JoinRejection::NotFound)?;
            (
                self.rooms
                    .get(&id)
                    .map(|e| e.value().clone())
                    .ok_or(JoinRejection::NotFound)?,
                true,
            )
        } else if let Some(id) = room_id {
            (
                self.rooms
                    .get(&id)
                    .map(|e| e.value().clone())
                    .ok_or(JoinRejection::NotFound)?,
                false,
            )
        } else {
            return Err(JoinRejection::NotFound);
        };

        if handle.meta.is_private && !via_code {
            return Err(JoinRejection::Private);
        }
        if handle.meta.player_count.load(std::sync::atomic::Ordering::Relaxed)
            >= handle.meta.max_players
        {
            return Err(JoinRejection::Full);
        }
        if handle.meta.phase() == RoomPhase::Racing && !handle.meta.allow_mid_race_join {
            return Err(JoinRejection::RaceInProgress);
        }

        // leave the previous room before joining the new one
        if self.session_rooms.get(&session_id).map(|e| *e.value()) != Some(handle.id) {
            self.leave(session_id).await;
        }

        self.session_rooms.insert(session_id, handle.id);
        let _ = handle
            .inbox
            .send(RoomCommand::Join {
                session_id,
                nickname,
                color,
            })
            .await;
        Ok(handle)
    }

    pub async fn leave(&self, session_id: Uuid) {
        if let Some((_, room_id)) = self.session_rooms.remove(&session_id) {
            if let Some(handle) = self.rooms.get(&room_id) {
                let _ = handle
                    .inbox
                    .send(RoomCommand::Leave { session_id })
                    .await;
            }
        }
    }

    pub fn room_of(&self, session_id: Uuid) -> Option<RoomHandle> {
        let room_id = self.session_rooms.get(&session_id).map(|e| *e.value())?;
        self.rooms.get(&room_id).map(|e| e.value().clone())
    }

    /// Route a command to the sender's current room; false when roomless
    pub async fn send_to_room(&self, session_id: Uuid, cmd: RoomCommand) -> bool {
        match self.room_of(session_id) {
            Some(handle) => handle.inbox.send(cmd).await.is_ok(),
            None => false,
        }
    }

    /// Socket dropped: keep the seat for the disconnect window, then evict
    pub fn on_disconnect(&self, session_id: Uuid) {
        let Some(handle) = self.room_of(session_id) else {
            return;
        };
        let registry = self.registry.clone();
        let session_rooms = self.session_rooms.clone();
        tokio::spawn(async move {
            let _ = handle
                .inbox
                .send(RoomCommand::Disconnected { session_id })
                .await;
            tokio::time::sleep(Duration::from_millis(PLAYER_DISCONNECT_TIMEOUT_MS)).await;
            // a live sender in the registry means the player came back
            if registry.contains_key(&session_id) {
                return;
            }
            session_rooms.remove(&session_id);
            let _ = handle.inbox.send(RoomCommand::Evict { session_id }).await;
        });
    }

    /// Reconnect within the window: hand the session its room back
    pub async fn resume(&self, session_id: Uuid) -> Option<RoomHandle> {
        let handle = self.room_of(session_id)?;
        let _ = handle
            .inbox
            .send(RoomCommand::Reconnected { session_id })
            .await;
        Some(handle)
    }

    /// Public room listing (private rooms are only reachable by code)
    pub fn public_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .filter(|e| !e.value().meta.is_private)
            .map(|e| {
                let h = e.value();
                RoomInfo {
                    id: h.id,
                    code: h.code.clone(),
                    host_id: h.meta.host,
                    state: h.meta.phase(),
                    players: h.meta.player_count.load(std::sync::atomic::Ordering::Relaxed),
                    max_players: h.meta.max_players,
                    lap_count: h.meta.lap_count,
                    track_id: h.meta.track_id.clone(),
                    is_private: h.meta.is_private,
                }
            })
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms
            .iter()
            .map(|e| {
                e.value()
                    .meta
                    .player_count
                    .load(std::sync::atomic::Ordering::Relaxed)
            })
            .sum()
    }

    /// One GC pass: shut down idle/empty rooms, drop stale session mappings.
    /// Returns how many rooms were asked to stop.
    pub async fn sweep(&self, now: u64) -> usize {
        let mut reaped = 0;
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let idle_ms =
                now.saturating_sub(handle.meta.last_activity.load(std::sync::atomic::Ordering::Relaxed));
            let empty = handle
                .meta
                .player_count
                .load(std::sync::atomic::Ordering::Relaxed)
                == 0;
            let expired = (empty && idle_ms > EMPTY_ROOM_GRACE_MS)
                || (handle.meta.phase() == RoomPhase::Waiting && idle_ms > ROOM_IDLE_TIMEOUT_MS);
            if expired {
                info!(room_id = %handle.id, idle_ms, "reaping idle room");
                let _ = handle.inbox.send(RoomCommand::Shutdown).await;
                reaped += 1;
            }
        }

        // mappings pointing at rooms that no longer exist
        let stale: Vec<Uuid> = self
            .session_rooms
            .iter()
            .filter(|e| !self.rooms.contains_key(e.value()))
            .map(|e| *e.key())
            .collect();
        for session_id in stale {
            self.session_rooms.remove(&session_id);
        }

        reaped
    }

    /// Periodic idle-GC task
    pub async fn run_gc(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GC_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.sweep(unix_millis()).await;
        }
    }
}
