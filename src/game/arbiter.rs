//! Race arbitration: checkpoint ordering, laps, finish detection, ranking

use crate::game::physics::NITRO_MAX;
use crate::game::Car;
use crate::math::{wrap_delta, Vec2};
use crate::track::{ElementKind, Track, TrackElement};
use crate::ws::protocol::GameEvent;

/// Race ends this long after the first finisher even if others are racing
pub const FINISH_GRACE_PERIOD_MS: u64 = 30_000;
/// Opt-in auto-respawn after this long without movement
pub const STUCK_THRESHOLD_MS: u64 = 5_000;
/// Movement below this distance does not reset the stuck clock
const STUCK_MOVE_EPSILON: f64 = 2.0;
/// Speed under which a car counts as not moving
const STUCK_SPEED: f64 = 0.3;
/// Boost pads only refill when the tank is below this fraction
const BOOST_REFILL_BELOW: f64 = 0.95;

/// Proximity trigger derived from a track element's circumscribed circle
#[derive(Debug, Clone, Copy)]
struct Trigger {
    center: Vec2,
    radius: f64,
}

impl Trigger {
    fn from_element(element: &TrackElement) -> Self {
        Self {
            center: element.center(),
            radius: element.trigger_radius(),
        }
    }
}

/// Per-race arbitration state. Owned by the room, rebuilt at race start.
pub struct RaceArbiter {
    checkpoints: Vec<Trigger>,
    finish: Trigger,
    boost_pads: Vec<Trigger>,
    ramps_up: Vec<Trigger>,
    ramps_down: Vec<Trigger>,
    lap_target: u32,
    /// Torus dimensions when the track wraps
    wrap: Option<(f64, f64)>,
    auto_respawn: bool,
    finish_order: u32,
    first_finish_at: Option<u64>,
}

impl RaceArbiter {
    /// Returns None when the track lacks a finish element
    pub fn new(track: &Track, lap_target: u32, auto_respawn: bool) -> Option<Self> {
        let finish = Trigger::from_element(track.finish()?);
        let checkpoints = track
            .checkpoints()
            .into_iter()
            .map(Trigger::from_element)
            .collect();
        let by_kind = |kind: ElementKind| -> Vec<Trigger> {
            track
                .elements
                .iter()
                .filter(|e| e.kind == kind)
                .map(Trigger::from_element)
                .collect()
        };

        Some(Self {
            checkpoints,
            finish,
            boost_pads: by_kind(ElementKind::Boost),
            ramps_up: by_kind(ElementKind::RampUp),
            ramps_down: by_kind(ElementKind::RampDown),
            lap_target,
            wrap: track
                .wrap_around
                .then(|| (track.width as f64, track.height as f64)),
            auto_respawn,
            finish_order: 0,
            first_finish_at: None,
        })
    }

    /// Distance from a car position to a trigger center, torus-aware
    fn distance(&self, pos: Vec2, trigger: &Trigger) -> f64 {
        match self.wrap {
            Some((w, h)) => {
                let dx = wrap_delta(pos.x, trigger.center.x, w);
                let dy = wrap_delta(pos.y, trigger.center.y, h);
                (dx * dx + dy * dy).sqrt()
            }
            None => pos.distance(trigger.center),
        }
    }

    fn inside(&self, pos: Vec2, trigger: &Trigger) -> bool {
        self.distance(pos, trigger) <= trigger.radius
    }

    /// Arbitrate one car for one tick. `elapsed` is the race clock in ms.
    pub fn tick_car(&mut self, car: &mut Car, elapsed: u64, events: &mut Vec<GameEvent>) {
        // Manual respawn, edge-triggered so a held key fires once
        if car.input.respawn && !car.respawn_held {
            car.respawn_held = true;
            self.respawn(car, elapsed, events);
        } else if !car.input.respawn {
            car.respawn_held = false;
        }

        if self.auto_respawn && !car.finished {
            self.check_stuck(car, elapsed, events);
        }

        self.apply_surfaces(car, events);

        if car.finished {
            // Keep the latch honest so spectating laps don't re-trigger
            car.passed_finish = self.inside(car.position, &self.finish);
            return;
        }

        // Next expected checkpoint
        if car.next_checkpoint < self.checkpoints.len() {
            let trigger = self.checkpoints[car.next_checkpoint];
            if self.inside(car.position, &trigger) {
                let passed = car.next_checkpoint as u32;
                car.next_checkpoint += 1;
                events.push(GameEvent::Checkpoint {
                    player_id: car.player_id,
                    checkpoint: passed,
                    time: elapsed,
                });
            }
        }

        // Finish line, rising-edge latched
        if self.inside(car.position, &self.finish) {
            if !car.passed_finish {
                car.passed_finish = true;
                if car.next_checkpoint == self.checkpoints.len() {
                    self.complete_lap(car, elapsed, events);
                }
            }
        } else {
            car.passed_finish = false;
        }
    }

    fn complete_lap(&mut self, car: &mut Car, elapsed: u64, events: &mut Vec<GameEvent>) {
        let lap_time = elapsed.saturating_sub(car.completed_time());
        car.lap_times.push(lap_time);
        car.lap += 1;
        car.next_checkpoint = 0;
        events.push(GameEvent::Lap {
            player_id: car.player_id,
            lap: car.lap,
            lap_time,
        });

        if car.lap >= self.lap_target {
            self.finish_order += 1;
            car.finished = true;
            car.finish_time = Some(elapsed);
            car.rank = self.finish_order;
            self.first_finish_at.get_or_insert(elapsed);
            events.push(GameEvent::Finish {
                player_id: car.player_id,
                rank: car.rank,
                total_time: elapsed,
            });
        }
    }

    /// Teleport to the last fully-passed checkpoint (or the spawn), kill
    /// all motion, and face the next checkpoint.
    pub fn respawn(&self, car: &mut Car, elapsed: u64, events: &mut Vec<GameEvent>) {
        let (position, fallback_rotation) = if car.next_checkpoint > 0 {
            (
                self.checkpoints[car.next_checkpoint - 1].center,
                car.rotation,
            )
        } else {
            (car.spawn_point, car.spawn_rotation)
        };

        let rotation = self
            .checkpoints
            .get(car.next_checkpoint)
            .map(|next| heading_towards(position, next.center))
            .unwrap_or(fallback_rotation);

        car.teleport(position, rotation);
        car.last_moved_at = elapsed;
        events.push(GameEvent::Respawn {
            player_id: car.player_id,
            x: position.x,
            y: position.y,
        });
    }

    fn check_stuck(&self, car: &mut Car, elapsed: u64, events: &mut Vec<GameEvent>) {
        if car.speed >= STUCK_SPEED
            || car.position.distance(car.last_position) > STUCK_MOVE_EPSILON
        {
            car.last_position = car.position;
            car.last_moved_at = elapsed;
            return;
        }
        if elapsed.saturating_sub(car.last_moved_at) >= STUCK_THRESHOLD_MS {
            self.respawn(car, elapsed, events);
        }
    }

    /// Position-only surface effects: boost pads refill nitro, ramps move
    /// the car between layers. None of these touch velocity, so the client
    /// predictor stays in agreement and the snapshot carries the result.
    fn apply_surfaces(&self, car: &mut Car, events: &mut Vec<GameEvent>) {
        for pad in &self.boost_pads {
            if self.inside(car.position, pad) && car.nitro < NITRO_MAX * BOOST_REFILL_BELOW {
                car.nitro = NITRO_MAX;
                events.push(GameEvent::NitroPickup {
                    player_id: car.player_id,
                    nitro: car.nitro as u32,
                });
            }
        }
        for ramp in &self.ramps_up {
            if self.inside(car.position, ramp) {
                car.layer = (car.layer + 1).min(2);
            }
        }
        for ramp in &self.ramps_down {
            if self.inside(car.position, ramp) {
                car.layer = (car.layer - 1).max(-1);
            }
        }
    }

    /// True when the race is over: everyone finished, or the grace period
    /// after the first finisher has elapsed.
    pub fn race_complete<'a>(
        &self,
        cars: impl Iterator<Item = &'a Car>,
        elapsed: u64,
    ) -> bool {
        let mut any = false;
        for car in cars {
            any = true;
            if !car.finished {
                return self
                    .first_finish_at
                    .map(|t| elapsed.saturating_sub(t) >= FINISH_GRACE_PERIOD_MS)
                    .unwrap_or(false);
            }
        }
        any
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn first_finish_at(&self) -> Option<u64> {
        self.first_finish_at
    }

    /// Total order over the car set, recomputed every tick: finished cars
    /// by finish time, then unfinished by lap, checkpoint progress, and
    /// distance to the next checkpoint.
    pub fn recompute_ranks(&self, cars: &mut [&mut Car]) {
        let mut order: Vec<usize> = (0..cars.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb): (&Car, &Car) = (&*cars[a], &*cars[b]);
            cb.finished
                .cmp(&ca.finished)
                .then_with(|| match (ca.finish_time, cb.finish_time) {
                    (Some(ta), Some(tb)) => ta.cmp(&tb),
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| cb.lap.cmp(&ca.lap))
                .then_with(|| cb.next_checkpoint.cmp(&ca.next_checkpoint))
                .then_with(|| {
                    let da = self.distance_to_next(ca);
                    let db = self.distance_to_next(cb);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        for (rank, idx) in order.into_iter().enumerate() {
            cars[idx].rank = rank as u32 + 1;
        }
    }

    fn distance_to_next(&self, car: &Car) -> f64 {
        let target = if car.next_checkpoint < self.checkpoints.len() {
            self.checkpoints[car.next_checkpoint]
        } else {
            self.finish
        };
        self.distance(car.position, &target)
    }
}

/// Rotation whose forward vector (sin r, -cos r) points from `from` to `to`
fn heading_towards(from: Vec2, to: Vec2) -> f64 {
    let d = to - from;
    d.x.atan2(-d.y)
}
