//! Client state store: remote-car interpolation and HUD-facing state
//!
//! Remote cars lerp a display transform toward the latest snapshot target.
//! The local player bypasses this entirely; its display is driven by the
//! predictor.

use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::client::predictor::Predictor;
use crate::math::{angle_lerp, wrap_offset, Vec2};
use crate::track::Track;
use crate::ws::protocol::{CarStateSnapshot, GameStateSnapshot, RoomPhase};

/// Remote jumps beyond this distance snap instead of lerping
pub const TELEPORT_THRESHOLD: f64 = 200.0;

/// Per-frame lerp factors, scaled by dt*60 and capped at 1
const POSITION_LERP: f64 = 0.2;
const ROTATION_LERP: f64 = 0.25;
/// Display positions are clamped into this world bound as a safety net
const WORLD_BOUND: f64 = 1e7;

#[derive(Debug, Clone)]
pub struct RemoteCar {
    pub snapshot: CarStateSnapshot,
    pub target_position: Vec2,
    pub target_rotation: f64,
    pub display_position: Vec2,
    pub display_rotation: f64,
}

/// HUD-facing derived state for the local player
#[derive(Debug, Clone)]
pub struct HudState {
    pub speed: f64,
    pub nitro: f64,
    pub lap: u32,
    pub checkpoint: u32,
    pub rank: u32,
    pub finished: bool,
    pub race_time: u64,
    pub game_state: RoomPhase,
    pub last_correction: f64,
    pub pending_inputs: usize,
    pub rtt_ms: f64,
}

pub struct ClientStore {
    local_id: Uuid,
    remotes: HashMap<Uuid, RemoteCar>,
    latest_sequence: u64,
    race_time: u64,
    game_state: RoomPhase,
    track_width: f64,
    track_height: f64,
    wrap_around: bool,
    /// Smoothed round-trip estimate from ping/pong, for the debug overlay
    rtt_ms: f64,
}

/// Exponential smoothing factor for new round-trip samples
const RTT_SMOOTHING: f64 = 0.2;

impl ClientStore {
    pub fn new(track: &Track, local_id: Uuid) -> Self {
        Self {
            local_id,
            remotes: HashMap::new(),
            latest_sequence: 0,
            race_time: 0,
            game_state: RoomPhase::Waiting,
            track_width: track.width as f64,
            track_height: track.height as f64,
            wrap_around: track.wrap_around,
            rtt_ms: 0.0,
        }
    }

    pub fn remotes(&self) -> &HashMap<Uuid, RemoteCar> {
        &self.remotes
    }

    /// Feed a pong's echoed timestamp to update the smoothed round trip
    pub fn on_pong(&mut self, client_timestamp: u64, now_ms: u64) {
        let sample = now_ms.saturating_sub(client_timestamp) as f64;
        if self.rtt_ms == 0.0 {
            self.rtt_ms = sample;
        } else {
            self.rtt_ms += (sample - self.rtt_ms) * RTT_SMOOTHING;
        }
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ms
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest_sequence
    }

    /// Apply one server snapshot: the local record goes to the predictor,
    /// remote records retarget (or teleport-snap) their display state.
    pub fn on_snapshot(&mut self, snapshot: &GameStateSnapshot, predictor: &mut Predictor) {
        // stale or duplicate snapshots are ignored; prediction covers gaps
        if snapshot.sequence <= self.latest_sequence {
            return;
        }
        self.latest_sequence = snapshot.sequence;
        self.race_time = snapshot.race_time;
        self.game_state = snapshot.game_state;

        let mut seen: Vec<Uuid> = Vec::with_capacity(snapshot.cars.len());
        for car in &snapshot.cars {
            seen.push(car.player_id);
            if car.player_id == self.local_id {
                predictor.reconcile(car, &snapshot.events);
                continue;
            }
            self.retarget_remote(car);
        }
        self.remotes.retain(|id, _| seen.contains(id));
    }

    fn retarget_remote(&mut self, car: &CarStateSnapshot) {
        let entry = self.remotes.entry(car.player_id).or_insert_with(|| RemoteCar {
            snapshot: car.clone(),
            target_position: Vec2::new(car.x, car.y),
            target_rotation: car.rotation,
            display_position: Vec2::new(car.x, car.y),
            display_rotation: car.rotation,
        });

        // unwrap the server position into the display's frame
        let target = if self.wrap_around {
            Vec2::new(
                car.x + wrap_offset(entry.display_position.x, car.x, self.track_width),
                car.y + wrap_offset(entry.display_position.y, car.y, self.track_height),
            )
        } else {
            Vec2::new(car.x, car.y)
        };

        if !target.is_finite() {
            warn!(player_id = %car.player_id, "non-finite remote target, keeping last good state");
            return;
        }

        if entry.display_position.distance(target) > TELEPORT_THRESHOLD {
            entry.display_position = target;
            entry.display_rotation = car.rotation;
        }
        entry.target_position = target;
        entry.target_rotation = car.rotation;
        entry.snapshot = car.clone();
    }

    /// Advance display interpolation by one render frame
    pub fn render_tick(&mut self, dt_secs: f64) {
        if !dt_secs.is_finite() || dt_secs <= 0.0 {
            return;
        }
        let frames = dt_secs * 60.0;
        let position_t = (POSITION_LERP * frames).min(1.0);
        let rotation_t = (ROTATION_LERP * frames).min(1.0);

        for remote in self.remotes.values_mut() {
            let next = remote.display_position.lerp(remote.target_position, position_t);
            if !next.is_finite() {
                warn!(player_id = %remote.snapshot.player_id, "non-finite display position, snapping to target");
                remote.display_position = remote.target_position;
            } else {
                remote.display_position = Vec2::new(
                    next.x.clamp(-WORLD_BOUND, WORLD_BOUND),
                    next.y.clamp(-WORLD_BOUND, WORLD_BOUND),
                );
            }
            remote.display_rotation =
                angle_lerp(remote.display_rotation, remote.target_rotation, rotation_t);
        }
    }

    /// Derived state for the HUD; the local car comes from the predictor
    pub fn hud(&self, predictor: &Predictor) -> HudState {
        let car = predictor.state();
        HudState {
            speed: car.speed,
            nitro: car.nitro,
            lap: car.lap,
            checkpoint: car.next_checkpoint as u32,
            rank: car.rank,
            finished: car.finished,
            race_time: self.race_time,
            game_state: self.game_state,
            last_correction: predictor.last_correction(),
            pending_inputs: predictor.pending_len(),
            rtt_ms: self.rtt_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{car_from_snapshot, snapshot_at};
    use crate::track::default_track;

    fn snapshot_with(
        sequence: u64,
        cars: Vec<CarStateSnapshot>,
    ) -> GameStateSnapshot {
        GameStateSnapshot {
            sequence,
            timestamp: 0,
            game_state: RoomPhase::Racing,
            race_time: sequence * 50,
            cars,
            events: Vec::new(),
        }
    }

    fn setup() -> (ClientStore, Predictor, Uuid, Uuid) {
        let track = default_track();
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let predictor = Predictor::new(&track, car_from_snapshot(&snapshot_at(local, 400.0, 300.0, 0.0)));
        let store = ClientStore::new(&track, local);
        (store, predictor, local, remote)
    }

    #[test]
    fn remote_cars_lerp_toward_targets() {
        let (mut store, mut predictor, local, remote) = setup();

        store.on_snapshot(
            &snapshot_with(
                1,
                vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 100.0, 100.0, 0.0)],
            ),
            &mut predictor,
        );
        let moved = snapshot_at(remote, 110.0, 100.0, 0.5);
        store.on_snapshot(
            &snapshot_with(2, vec![snapshot_at(local, 400.0, 300.0, 0.0), moved]),
            &mut predictor,
        );

        let before = store.remotes()[&remote].display_position;
        store.render_tick(1.0 / 60.0);
        let after = store.remotes()[&remote].display_position;
        assert!(after.x > before.x);
        assert!(after.x < 110.0);

        // repeated frames converge on the target
        for _ in 0..120 {
            store.render_tick(1.0 / 60.0);
        }
        let settled = store.remotes()[&remote].display_position;
        assert!((settled.x - 110.0).abs() < 0.5);
    }

    #[test]
    fn big_jumps_teleport_the_display() {
        let (mut store, mut predictor, local, remote) = setup();

        store.on_snapshot(
            &snapshot_with(
                1,
                vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 100.0, 100.0, 0.0)],
            ),
            &mut predictor,
        );
        store.on_snapshot(
            &snapshot_with(
                2,
                vec![
                    snapshot_at(local, 400.0, 300.0, 0.0),
                    snapshot_at(remote, 100.0 + TELEPORT_THRESHOLD + 50.0, 100.0, 0.0),
                ],
            ),
            &mut predictor,
        );

        let display = store.remotes()[&remote].display_position;
        assert_eq!(display.x, 100.0 + TELEPORT_THRESHOLD + 50.0);
    }

    #[test]
    fn wrap_tracks_unwrap_remote_targets() {
        let track = {
            let mut t = default_track();
            t.wrap_around = true;
            t
        };
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut predictor =
            Predictor::new(&track, car_from_snapshot(&snapshot_at(local, 400.0, 300.0, 0.0)));
        let mut store = ClientStore::new(&track, local);

        store.on_snapshot(
            &snapshot_with(
                1,
                vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 795.0, 300.0, 0.0)],
            ),
            &mut predictor,
        );
        // the remote wrapped to the left edge; display should chase 805, not 5
        store.on_snapshot(
            &snapshot_with(2, vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 5.0, 300.0, 0.0)]),
            &mut predictor,
        );
        let target = store.remotes()[&remote].target_position;
        assert_eq!(target.x, 805.0);
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let (mut store, mut predictor, local, remote) = setup();
        store.on_snapshot(
            &snapshot_with(5, vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 100.0, 100.0, 0.0)]),
            &mut predictor,
        );
        store.on_snapshot(
            &snapshot_with(4, vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 900.0, 900.0, 0.0)]),
            &mut predictor,
        );
        assert_eq!(store.latest_sequence(), 5);
        assert_eq!(store.remotes()[&remote].target_position.x, 100.0);
    }

    #[test]
    fn departed_cars_are_pruned() {
        let (mut store, mut predictor, local, remote) = setup();
        store.on_snapshot(
            &snapshot_with(1, vec![snapshot_at(local, 400.0, 300.0, 0.0), snapshot_at(remote, 100.0, 100.0, 0.0)]),
            &mut predictor,
        );
        assert_eq!(store.remotes().len(), 1);
        store.on_snapshot(
            &snapshot_with(2, vec![snapshot_at(local, 400.0, 300.0, 0.0)]),
            &mut predictor,
        );
        assert!(store.remotes().is_empty());
    }

    #[test]
    fn rtt_estimate_smooths_samples() {
        let (mut store, _predictor, _local, _remote) = setup();
        store.on_pong(1_000, 1_080);
        assert_eq!(store.rtt_ms(), 80.0);
        store.on_pong(2_000, 2_040);
        // 80 + (40 - 80) * 0.2
        assert_eq!(store.rtt_ms(), 72.0);
    }

    #[test]
    fn hud_reflects_predictor_and_clock() {
        let (mut store, mut predictor, local, remote) = setup();
        let mut local_snap = snapshot_at(local, 400.0, 300.0, 0.0);
        local_snap.lap = 2;
        local_snap.position_rank = 1;
        store.on_snapshot(
            &snapshot_with(3, vec![local_snap, snapshot_at(remote, 0.0, 0.0, 0.0)]),
            &mut predictor,
        );

        let hud = store.hud(&predictor);
        assert_eq!(hud.lap, 2);
        assert_eq!(hud.rank, 1);
        assert_eq!(hud.race_time, 150);
        assert_eq!(hud.game_state, RoomPhase::Racing);
    }
}
