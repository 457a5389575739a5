//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::track::Track;

/// Error codes carried by `error{code, message}` messages
pub mod codes {
    pub const INVALID_NICKNAME: &str = "INVALID_NICKNAME";
    pub const NO_ROOM: &str = "NO_ROOM";
    pub const JOIN_FAILED: &str = "JOIN_FAILED";
    pub const NOT_HOST: &str = "NOT_HOST";
    pub const CANNOT_START: &str = "CANNOT_START";
    pub const CREATE_FAILED: &str = "CREATE_FAILED";
}

/// Room phase, also the `gameState` field of snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    Countdown,
    Racing,
    Results,
}

/// Room settings chosen at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    #[serde(default = "defaults::max_players")]
    pub max_players: usize,
    #[serde(default = "defaults::lap_count")]
    pub lap_count: u32,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "defaults::yes")]
    pub allow_mid_race_join: bool,
    #[serde(default = "defaults::yes")]
    pub enable_chat: bool,
    #[serde(default)]
    pub track_id: Option<String>,
    /// Opt-in: auto-respawn cars stuck for longer than the stuck threshold
    #[serde(default)]
    pub auto_respawn: bool,
}

mod defaults {
    pub fn max_players() -> usize {
        8
    }
    pub fn lap_count() -> u32 {
        3
    }
    pub fn yes() -> bool {
        true
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: defaults::max_players(),
            lap_count: defaults::lap_count(),
            is_private: false,
            allow_mid_race_join: true,
            enable_chat: true,
            track_id: None,
            auto_respawn: false,
        }
    }
}

impl RoomSettings {
    /// Bounds check applied at room creation
    pub fn is_valid(&self) -> bool {
        (1..=16).contains(&self.max_players) && (1..=50).contains(&self.lap_count)
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Create a room and join it as host
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        #[serde(default)]
        settings: RoomSettings,
        nickname: String,
        #[serde(default)]
        preferred_color: Option<String>,
    },

    /// Join an existing room by id or short code
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(default)]
        room_id: Option<Uuid>,
        #[serde(default)]
        code: Option<String>,
        nickname: String,
        #[serde(default)]
        preferred_color: Option<String>,
    },

    LeaveRoom,

    SetReady {
        ready: bool,
    },

    /// Host-only race start
    StartGame,

    /// Player input for the current tick. Canonical field names only; the
    /// legacy aliases (`turnLeft`, `turnRight`, `boost`) are rejected at
    /// ingress rather than silently merged.
    #[serde(rename_all = "camelCase")]
    Input {
        player_id: Uuid,
        sequence: u32,
        #[serde(default)]
        timestamp: u64,
        #[serde(default)]
        accelerate: bool,
        #[serde(default)]
        brake: bool,
        #[serde(default)]
        steer_left: bool,
        #[serde(default)]
        steer_right: bool,
        #[serde(default)]
        steer_value: f64,
        #[serde(default)]
        nitro: bool,
        #[serde(default)]
        handbrake: bool,
        #[serde(default)]
        respawn: bool,
    },

    Chat {
        message: String,
    },

    Emote {
        emote: String,
    },

    RequestRoomList,

    RequestTrackList,

    Ping {
        timestamp: u64,
    },
}

/// Legacy input-field aliases that are no longer accepted on the wire
const REJECTED_INPUT_ALIASES: [&str; 3] = ["turnLeft", "turnRight", "boost"];

/// Returns the first rejected legacy alias present on a raw `input` message
pub fn rejected_input_alias(value: &Value) -> Option<&'static str> {
    if value.get("type").and_then(Value::as_str) != Some("input") {
        return None;
    }
    REJECTED_INPUT_ALIASES
        .iter()
        .find(|alias| value.get(**alias).is_some())
        .copied()
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    #[serde(rename_all = "camelCase")]
    Welcome {
        player_id: Uuid,
        server_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room: RoomInfo,
        players: Vec<PlayerProfile>,
        player_id: Uuid,
    },

    RoomLeft {
        reason: String,
    },

    PlayerJoined {
        player: PlayerProfile,
    },

    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: Uuid,
        reason: String,
    },

    #[serde(rename_all = "camelCase")]
    PlayerReady {
        player_id: Uuid,
        ready: bool,
    },

    /// Race is about to begin: full track, countdown, initial car states
    GameStarting {
        countdown: u32,
        track: Box<Track>,
        cars: Vec<CarStateSnapshot>,
    },

    /// One countdown step; `count` 0 means "GO!"
    Countdown {
        count: u32,
    },

    #[serde(rename_all = "camelCase")]
    GameStarted {
        start_time: u64,
    },

    GameState {
        snapshot: GameStateSnapshot,
    },

    #[serde(rename_all = "camelCase")]
    CheckpointPassed {
        player_id: Uuid,
        checkpoint: u32,
        time: u64,
    },

    #[serde(rename_all = "camelCase")]
    LapCompleted {
        player_id: Uuid,
        lap: u32,
        lap_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    PlayerFinished {
        player_id: Uuid,
        position: u32,
        total_time: u64,
    },

    RaceFinished {
        results: Vec<RaceResult>,
    },

    #[serde(rename_all = "camelCase")]
    Collision {
        player_id: Uuid,
        other_id: Uuid,
        impact: f64,
    },

    #[serde(rename_all = "camelCase")]
    Chat {
        player_id: Uuid,
        nickname: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    Emote {
        player_id: Uuid,
        emote: String,
    },

    RoomList {
        rooms: Vec<RoomInfo>,
    },

    TrackList {
        tracks: Vec<TrackSummary>,
    },

    Error {
        code: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Player info as seen by room members
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub player_id: Uuid,
    pub nickname: String,
    pub color: String,
    pub ready: bool,
    pub is_host: bool,
    pub connected: bool,
}

/// Room listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: Uuid,
    pub code: String,
    pub host_id: Uuid,
    pub state: RoomPhase,
    pub players: usize,
    pub max_players: usize,
    pub lap_count: u32,
    pub track_id: String,
    pub is_private: bool,
}

/// Track listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    pub author: String,
    pub difficulty: crate::track::Difficulty,
    pub default_lap_count: u32,
}

/// Final standing of one player
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub player_id: Uuid,
    pub nickname: String,
    pub rank: u32,
    pub finished: bool,
    pub total_time: Option<u64>,
    pub best_lap: Option<u64>,
    pub lap_times: Vec<u64>,
}

/// Per-car record inside a snapshot. Positions and velocities are quantized
/// to 0.01, angles to 0.001, speed to 0.1; see `game::snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarStateSnapshot {
    pub id: Uuid,
    pub player_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub vx: f64,
    pub vy: f64,
    pub angular_velocity: f64,
    pub steering_angle: f64,
    pub speed: f64,
    pub nitro: u32,
    /// Cosmetic damage ordinal 0..3
    pub damage: u8,
    pub lap: u32,
    pub checkpoint: u32,
    pub position_rank: u32,
    pub finished: bool,
    pub layer: i8,
    pub last_input_sequence: u32,
}

/// Game state snapshot broadcast at the snapshot rate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub sequence: u64,
    pub timestamp: u64,
    pub game_state: RoomPhase,
    /// Race clock in milliseconds since the green light
    pub race_time: u64,
    pub cars: Vec<CarStateSnapshot>,
    pub events: Vec<GameEvent>,
}

/// Events fired between snapshots, bundled with the next one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    #[serde(rename_all = "camelCase")]
    Checkpoint {
        player_id: Uuid,
        checkpoint: u32,
        time: u64,
    },

    #[serde(rename_all = "camelCase")]
    Lap {
        player_id: Uuid,
        lap: u32,
        lap_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    Finish {
        player_id: Uuid,
        rank: u32,
        total_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    Respawn {
        player_id: Uuid,
        x: f64,
        y: f64,
    },

    #[serde(rename_all = "camelCase")]
    Collision {
        player_id: Uuid,
        other_id: Uuid,
        impact: f64,
    },

    #[serde(rename_all = "camelCase")]
    NitroPickup {
        player_id: Uuid,
        nitro: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_uses_legacy_tag_shape() {
        let json = r#"{"type":"set_ready","ready":true}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMsg::SetReady { ready: true }));
    }

    #[test]
    fn input_parses_with_camel_case_fields() {
        let json = format!(
            r#"{{"type":"input","playerId":"{}","sequence":7,"timestamp":123,"accelerate":true,"steerLeft":true,"steerValue":-0.5}}"#,
            Uuid::nil()
        );
        let msg: ClientMsg = serde_json::from_str(&json).unwrap();
        match msg {
            ClientMsg::Input {
                sequence,
                accelerate,
                steer_left,
                steer_value,
                brake,
                ..
            } => {
                assert_eq!(sequence, 7);
                assert!(accelerate);
                assert!(steer_left);
                assert_eq!(steer_value, -0.5);
                assert!(!brake);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn legacy_aliases_are_detected() {
        let raw: Value = serde_json::from_str(
            r#"{"type":"input","playerId":"00000000-0000-0000-0000-000000000000","sequence":1,"boost":true}"#,
        )
        .unwrap();
        assert_eq!(rejected_input_alias(&raw), Some("boost"));

        let clean: Value = serde_json::from_str(
            r#"{"type":"input","playerId":"00000000-0000-0000-0000-000000000000","sequence":1,"nitro":true}"#,
        )
        .unwrap();
        assert_eq!(rejected_input_alias(&clean), None);

        let other: Value = serde_json::from_str(r#"{"type":"chat","message":"boost"}"#).unwrap();
        assert_eq!(rejected_input_alias(&other), None);
    }

    #[test]
    fn server_msg_round_trips() {
        let msg = ServerMsg::Countdown { count: 0 };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"countdown""#));
        let back: ServerMsg = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ServerMsg::Countdown { count: 0 }));
    }

    #[test]
    fn game_event_uses_event_type_tag() {
        let event = GameEvent::Lap {
            player_id: Uuid::nil(),
            lap: 2,
            lap_time: 31500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"lap""#));
        assert!(json.contains(r#""lapTime":31500"#));
    }
}
