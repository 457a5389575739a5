//! Snapshot assembly and quantization

use crate::game::physics::{PHYSICS_TICK_RATE, SNAPSHOT_RATE};
use crate::game::Car;
use crate::ws::protocol::{CarStateSnapshot, GameEvent, GameStateSnapshot, RoomPhase};

/// Quantize to a decimal step: 0.01 for positions/velocities, 0.001 for
/// angles, 0.1 for speed. The round trip is lossy by design.
fn quantize(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// Compact per-car record for the wire
pub fn car_snapshot(car: &Car) -> CarStateSnapshot {
    CarStateSnapshot {
        id: car.id,
        player_id: car.player_id,
        x: quantize(car.position.x, 0.01),
        y: quantize(car.position.y, 0.01),
        rotation: quantize(car.rotation, 0.001),
        vx: quantize(car.velocity.x, 0.01),
        vy: quantize(car.velocity.y, 0.01),
        angular_velocity: quantize(car.angular_velocity, 0.001),
        steering_angle: quantize(car.steering, 0.001),
        speed: quantize(car.speed, 0.1),
        nitro: car.nitro.round() as u32,
        damage: car.damage.min(3),
        lap: car.lap,
        checkpoint: car.next_checkpoint as u32,
        position_rank: car.rank,
        finished: car.finished,
        layer: car.layer,
        last_input_sequence: car.last_input_sequence,
    }
}

/// Gates broadcasts to the snapshot rate and stamps the monotonic sequence
pub struct SnapshotBuilder {
    ticks_since_snapshot: u32,
    snapshot_interval: u32,
    sequence: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: PHYSICS_TICK_RATE / SNAPSHOT_RATE,
            sequence: 0,
        }
    }

    /// Call once per physics tick; true when a snapshot is due
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force a snapshot on the next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Build a snapshot, consuming the events fired since the previous one
    pub fn build<'a>(
        &mut self,
        phase: RoomPhase,
        timestamp: u64,
        race_time: u64,
        cars: impl Iterator<Item = &'a Car>,
        events: Vec<GameEvent>,
    ) -> GameStateSnapshot {
        self.sequence += 1;
        GameStateSnapshot {
            sequence: self.sequence,
            timestamp,
            game_state: phase,
            race_time,
            cars: cars.map(car_snapshot).collect(),
            events,
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
