//! Client-side prediction and server reconciliation
//!
//! The predictor runs the same integrator as the server, in unbounded
//! continuous coordinates: it never wraps. Server positions are unwrapped
//! into the predictor's frame before blending, so driving off the edge of a
//! toroidal track stays seamless for the local player.

use std::collections::VecDeque;
use tracing::warn;

use crate::game::physics::{Integrator, DT_MS};
use crate::game::{Car, InputFrame};
use crate::math::{angle_lerp, wrap_offset, Vec2};
use crate::track::Track;
use crate::ws::protocol::{CarStateSnapshot, GameEvent};

/// Pending unconfirmed inputs kept for reconciliation
pub const MAX_PENDING_INPUTS: usize = 120;
/// Corrections beyond this distance hard-snap instead of blending
pub const SNAP_THRESHOLD: f64 = 150.0;

const VELOCITY_BLEND: f64 = 0.15;
const ANGULAR_BLEND: f64 = 0.15;
const ROTATION_BLEND: f64 = 0.3;
const POSITION_BLEND: f64 = 0.1;
/// Below this distance the position is left untouched
const POSITION_DEADBAND: f64 = 0.5;

pub struct Predictor {
    car: Car,
    pending: VecDeque<InputFrame>,
    /// Held input used for continuous ticks between input events
    current: InputFrame,
    last_acked_sequence: u32,
    accumulator_ms: f64,
    track_width: f64,
    track_height: f64,
    wrap_around: bool,
    /// Distance of the most recent reconciliation correction, for the
    /// debug overlay
    last_correction: f64,
}

impl Predictor {
    pub fn new(track: &Track, car: Car) -> Self {
        Self {
            car,
            pending: VecDeque::with_capacity(MAX_PENDING_INPUTS),
            current: InputFrame::default(),
            last_acked_sequence: 0,
            accumulator_ms: 0.0,
            track_width: track.width as f64,
            track_height: track.height as f64,
            wrap_around: track.wrap_around,
            last_correction: 0.0,
        }
    }

    pub fn state(&self) -> &Car {
        &self.car
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_acked_sequence(&self) -> u32 {
        self.last_acked_sequence
    }

    pub fn last_correction(&self) -> f64 {
        self.last_correction
    }

    /// Record a local input event and apply one immediate step for
    /// perceived responsiveness.
    pub fn apply_input(&mut self, frame: InputFrame) {
        self.pending.push_back(frame);
        while self.pending.len() > MAX_PENDING_INPUTS {
            self.pending.pop_front();
        }
        self.current = frame;
        Integrator::step(&mut self.car, &frame);
    }

    /// Feed elapsed real time; runs fixed steps with the held input so the
    /// simulation is independent of display refresh.
    pub fn advance(&mut self, dt_secs: f64) {
        if !dt_secs.is_finite() || dt_secs < 0.0 {
            return;
        }
        self.accumulator_ms += dt_secs * 1000.0;
        while self.accumulator_ms >= DT_MS {
            let current = self.current;
            Integrator::step(&mut self.car, &current);
            self.accumulator_ms -= DT_MS;
        }
    }

    /// Unwrap a server coordinate into the predictor's unbounded frame
    fn unwrap_target(&self, snap: &CarStateSnapshot) -> Vec2 {
        if self.wrap_around {
            Vec2::new(
                snap.x + wrap_offset(self.car.position.x, snap.x, self.track_width),
                snap.y + wrap_offset(self.car.position.y, snap.y, self.track_height),
            )
        } else {
            Vec2::new(snap.x, snap.y)
        }
    }

    /// Reconcile against the authoritative car record from a snapshot.
    /// `events` are the snapshot's bundled events, used to catch respawns.
    pub fn reconcile(&mut self, snap: &CarStateSnapshot, events: &[GameEvent]) {
        // Drop everything the server has already acted on
        if snap.last_input_sequence > self.last_acked_sequence {
            self.last_acked_sequence = snap.last_input_sequence;
        }
        self.pending
            .retain(|frame| frame.sequence > snap.last_input_sequence);

        let respawned = events.iter().any(|e| {
            matches!(e, GameEvent::Respawn { player_id, .. } if *player_id == self.car.player_id)
        });
        if respawned {
            self.car.velocity = Vec2::ZERO;
            self.car.angular_velocity = 0.0;
            self.pending.clear();
        }

        let target = self.unwrap_target(snap);
        let target_velocity = Vec2::new(snap.vx, snap.vy);
        if !target.is_finite() || !target_velocity.is_finite() {
            warn!(player_id = %self.car.player_id, "non-finite snapshot target ignored");
            return;
        }

        self.car.velocity = self.car.velocity.lerp(target_velocity, VELOCITY_BLEND);
        self.car.angular_velocity +=
            (snap.angular_velocity - self.car.angular_velocity) * ANGULAR_BLEND;
        self.car.rotation = angle_lerp(self.car.rotation, snap.rotation, ROTATION_BLEND);

        let correction = self.car.position.distance(target);
        self.last_correction = correction;
        if correction > SNAP_THRESHOLD {
            // covers respawns and teleports
            self.car.position = target;
            self.car.rotation = snap.rotation;
            self.car.velocity = target_velocity;
            self.car.angular_velocity = snap.angular_velocity;
        } else if correction > POSITION_DEADBAND {
            self.car.position = self.car.position.lerp(target, POSITION_BLEND);
        }

        // Race bookkeeping is authoritative
        self.car.lap = snap.lap;
        self.car.next_checkpoint = snap.checkpoint as usize;
        self.car.rank = snap.position_rank;
        self.car.finished = snap.finished;
        self.car.nitro = snap.nitro as f64;
        self.car.damage = snap.damage;
        self.car.layer = snap.layer;
        self.car.speed = self.car.velocity.length();
    }
}
