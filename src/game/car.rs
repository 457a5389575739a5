//! Car runtime state (authoritative on the server, predicted on the client)

use uuid::Uuid;

use crate::game::physics::NITRO_MAX;
use crate::game::InputFrame;
use crate::math::Vec2;
use crate::track::TrackElement;

#[derive(Debug, Clone)]
pub struct Car {
    pub id: Uuid,
    pub player_id: Uuid,

    pub position: Vec2,
    /// Radians; forward is (sin r, -cos r)
    pub rotation: f64,
    pub velocity: Vec2,
    pub angular_velocity: f64,
    /// Scalar speed cache, refreshed each physics step
    pub speed: f64,
    /// Visual steering angle in radians
    pub steering: f64,

    pub nitro: f64,
    /// Cosmetic damage ordinal 0..3
    pub damage: u8,
    pub layer: i8,

    /// Index of the next checkpoint this car must pass
    pub next_checkpoint: usize,
    pub lap: u32,
    /// Completed lap times in milliseconds
    pub lap_times: Vec<u64>,
    /// Rising-edge latch for the finish line
    pub passed_finish: bool,
    pub finished: bool,
    pub finish_time: Option<u64>,
    pub rank: u32,

    /// Spawn this car started from, used for respawn before any checkpoint
    pub spawn_point: Vec2,
    pub spawn_rotation: f64,

    pub last_input_sequence: u32,
    pub input: InputFrame,
    /// Edge detector so a held respawn key triggers once
    pub respawn_held: bool,

    /// Movement baseline for stuck detection (race clock ms)
    pub last_position: Vec2,
    pub last_moved_at: u64,
}

impl Car {
    pub fn at_spawn(player_id: Uuid, spawn: &TrackElement) -> Self {
        let position = spawn.center();
        Self {
            id: Uuid::new_v4(),
            player_id,
            position,
            rotation: spawn.rotation,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            speed: 0.0,
            steering: 0.0,
            nitro: NITRO_MAX,
            damage: 0,
            layer: spawn.layer.unwrap_or(0),
            next_checkpoint: 0,
            lap: 0,
            lap_times: Vec::new(),
            passed_finish: false,
            finished: false,
            finish_time: None,
            rank: 0,
            spawn_point: position,
            spawn_rotation: spawn.rotation,
            last_input_sequence: 0,
            input: InputFrame::default(),
            respawn_held: false,
            last_position: position,
            last_moved_at: 0,
        }
    }

    /// Sum of completed lap times, the origin for the current lap's clock
    pub fn completed_time(&self) -> u64 {
        self.lap_times.iter().sum()
    }

    pub fn best_lap(&self) -> Option<u64> {
        self.lap_times.iter().copied().min()
    }

    /// Teleport used by respawn: reposition and kill all motion
    pub fn teleport(&mut self, position: Vec2, rotation: f64) {
        self.position = position;
        self.rotation = rotation;
        self.velocity = Vec2::ZERO;
        self.angular_velocity = 0.0;
        self.speed = 0.0;
        self.last_position = position;
    }
}
