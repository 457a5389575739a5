//! Headless client-side modules: the local predictor and the remote-car
//! state store. The server holds none of this state.

pub mod predictor;
pub mod store;

pub use predictor::{Predictor, SNAP_THRESHOLD};
pub use store::{ClientStore, HudState, TELEPORT_THRESHOLD};

use uuid::Uuid;

use crate::game::{Car, InputFrame};
use crate::math::Vec2;
use crate::ws::protocol::CarStateSnapshot;

/// Build a local car from a server car record (used at race start and on
/// hard snaps). Lap bookkeeping fields stay authoritative on the server.
pub fn car_from_snapshot(snap: &CarStateSnapshot) -> Car {
    let position = Vec2::new(snap.x, snap.y);
    Car {
        id: snap.id,
        player_id: snap.player_id,
        position,
        rotation: snap.rotation,
        velocity: Vec2::new(snap.vx, snap.vy),
        angular_velocity: snap.angular_velocity,
        speed: snap.speed,
        steering: snap.steering_angle,
        nitro: snap.nitro as f64,
        damage: snap.damage,
        layer: snap.layer,
        next_checkpoint: snap.checkpoint as usize,
        lap: snap.lap,
        lap_times: Vec::new(),
        passed_finish: false,
        finished: snap.finished,
        finish_time: None,
        rank: snap.position_rank,
        spawn_point: position,
        spawn_rotation: snap.rotation,
        last_input_sequence: snap.last_input_sequence,
        input: InputFrame::default(),
        respawn_held: false,
        last_position: position,
        last_moved_at: 0,
    }
}

/// Snapshot record for a freshly spawned car, handy in tests
pub fn snapshot_at(player_id: Uuid, x: f64, y: f64, rotation: f64) -> CarStateSnapshot {
    CarStateSnapshot {
        id: player_id,
        player_id,
        x,
        y,
        rotation,
        vx: 0.0,
        vy: 0.0,
        angular_velocity: 0.0,
        steering_angle: 0.0,
        speed: 0.0,
        nitro: 100,
        damage: 0,
        lap: 0,
        checkpoint: 0,
        position_rank: 0,
        finished: false,
        layer: 0,
        last_input_sequence: 0,
    }
}
