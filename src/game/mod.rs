//! Game simulation modules

pub mod arbiter;
pub mod car;
pub mod physics;
pub mod room;
pub mod snapshot;

pub use car::Car;
pub use room::{Room, RoomHandle, RoomMeta};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// One input record, already normalized to the canonical field names
#[derive(Debug, Clone, Copy, Default)]
pub struct InputFrame {
    pub sequence: u32,
    pub timestamp: u64,
    pub accelerate: bool,
    pub brake: bool,
    pub steer_left: bool,
    pub steer_right: bool,
    pub steer_value: f64,
    pub nitro: bool,
    pub handbrake: bool,
    pub respawn: bool,
}

impl InputFrame {
    /// Scalar steering input in [-1, 1]: analog wins when nonzero
    pub fn steer(&self) -> f64 {
        if self.steer_value != 0.0 {
            self.steer_value.clamp(-1.0, 1.0)
        } else {
            (self.steer_right as i8 - self.steer_left as i8) as f64
        }
    }
}

/// Commands delivered to a room's inbox. All room state mutation happens
/// on the room task when these are applied.
#[derive(Debug, Clone)]
pub enum RoomCommand {
    Join {
        session_id: Uuid,
        nickname: String,
        color: Option<String>,
    },
    Leave {
        session_id: Uuid,
    },
    Disconnected {
        session_id: Uuid,
    },
    Reconnected {
        session_id: Uuid,
    },
    /// Deferred eviction after the disconnect window; ignored if the
    /// player reconnected in the meantime
    Evict {
        session_id: Uuid,
    },
    SetReady {
        session_id: Uuid,
        ready: bool,
    },
    StartGame {
        session_id: Uuid,
    },
    Input {
        session_id: Uuid,
        frame: InputFrame,
    },
    Chat {
        session_id: Uuid,
        message: String,
    },
    Emote {
        session_id: Uuid,
        emote: String,
    },
    Shutdown,
}

/// Delivery target for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Except(Uuid),
    Only(Uuid),
}

/// A server message plus who in the room should receive it
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            target: Target::All,
            msg,
        }
    }

    pub fn except(session_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            target: Target::Except(session_id),
            msg,
        }
    }

    pub fn only(session_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            target: Target::Only(session_id),
            msg,
        }
    }
}

/// Per-session outbound channels, shared between the gateway and the rooms
pub type SessionRegistry =
    std::sync::Arc<dashmap::DashMap<Uuid, mpsc::UnboundedSender<ServerMsg>>>;
