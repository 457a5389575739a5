//! Car physics and movement constraints
//!
//! The same step runs authoritatively on the server and for prediction on
//! the client; both sides must keep the exact constants and step order or
//! reconciliation corrections grow past the acceptable bound.

use tracing::warn;

use crate::game::{Car, InputFrame};
use crate::math::{wrap_mod, Vec2};

/// Physics ticks per second
pub const PHYSICS_TICK_RATE: u32 = 60;
/// State broadcasts per second
pub const SNAPSHOT_RATE: u32 = 20;
/// Fixed timestep in milliseconds; force units are per-ms-squared
pub const DT_MS: f64 = 1000.0 / 60.0;

/// Body: 30x20 rectangle at density 0.002
pub const MASS: f64 = 0.002 * 30.0 * 20.0;
pub const FRICTION_AIR: f64 = 0.01;

pub const ENGINE_FORCE: f64 = 2.0;
pub const REVERSE_FORCE: f64 = 1.0;
pub const DRAG_COEFFICIENT: f64 = 0.001;
pub const ROLLING_RESISTANCE: f64 = 0.005;

pub const MAX_SPEED: f64 = 15.0;
pub const MAX_REVERSE_SPEED: f64 = 5.0;
pub const NITRO_BOOST_MULTIPLIER: f64 = 1.5;
pub const NITRO_MAX: f64 = 100.0;
pub const NITRO_BURN_PER_TICK: f64 = 0.6;

/// Radians of lock at full steering input
pub const MAX_STEERING_ANGLE: f64 = 0.8;
pub const STEERING_RESPONSE: f64 = 0.18;
pub const MAX_ANGULAR_VELOCITY: f64 = 0.25;
/// Angular decay while not steering
const STEERING_CENTERING: f64 = 0.85;

/// Car hitbox radius for car-car contact
pub const CAR_RADIUS: f64 = 12.0;
pub const COLLISION_RESTITUTION: f64 = 0.45;
/// Impact speed above which contact damages the car
const DAMAGE_IMPACT_THRESHOLD: f64 = 4.0;

/// Forward unit vector for a rotation
pub fn forward(rotation: f64) -> Vec2 {
    Vec2::new(rotation.sin(), -rotation.cos())
}

/// Car-car contact resolved during a tick
#[derive(Debug, Clone, Copy)]
pub struct CollisionHit {
    pub a: uuid::Uuid,
    pub b: uuid::Uuid,
    pub impact: f64,
    pub damaged: bool,
}

/// The shared fixed-step integrator
pub struct Integrator;

impl Integrator {
    /// Advance one car by one fixed tick. Never fails: a missing input is
    /// an all-false frame and the car coasts under drag.
    pub fn step(car: &mut Car, input: &InputFrame) {
        let prev_position = car.position;

        let speed = car.velocity.length();
        let fwd = forward(car.rotation);
        let forward_speed = car.velocity.dot(fwd);

        // Force accumulation (applied at integration, not here)
        let mut force = Vec2::ZERO;
        let nitro_active = input.nitro && car.nitro > 0.0;

        if input.accelerate && speed < MAX_SPEED {
            force += fwd * (ENGINE_FORCE * 0.001);
        }
        if nitro_active {
            force += fwd * (ENGINE_FORCE * 0.0015);
            car.nitro = (car.nitro - NITRO_BURN_PER_TICK).max(0.0);
        }

        // Direct velocity modification: braking, then reverse thrust
        if input.brake {
            if forward_speed > 1.0 {
                car.velocity = car.velocity * 0.95;
            } else if speed < MAX_REVERSE_SPEED {
                force += -fwd * (REVERSE_FORCE * 0.001);
            }
        }

        // Steering
        let steer = input.steer();
        car.steering = steer * MAX_STEERING_ANGLE;
        if speed > 0.5 && steer != 0.0 {
            let speed_factor = if speed < 3.0 {
                speed / 3.0
            } else if speed <= 15.0 {
                1.0
            } else {
                (15.0 / speed).max(0.5)
            };
            let direction = if forward_speed < 0.0 { -1.0 } else { 1.0 };
            car.angular_velocity =
                steer * MAX_STEERING_ANGLE * STEERING_RESPONSE * speed_factor * direction;
        } else {
            car.angular_velocity *= STEERING_CENTERING;
        }
        car.angular_velocity = car
            .angular_velocity
            .clamp(-MAX_ANGULAR_VELOCITY, MAX_ANGULAR_VELOCITY);

        // Drag, computed from the pre-drag speed
        let pre_drag_speed = car.velocity.length();
        let drag_factor =
            (1.0 - DRAG_COEFFICIENT * pre_drag_speed - ROLLING_RESISTANCE).max(0.0);
        car.velocity = car.velocity * drag_factor;

        // Speed clamp, nitro-aware
        let cap = if nitro_active {
            MAX_SPEED * NITRO_BOOST_MULTIPLIER
        } else {
            MAX_SPEED
        };
        let clamped_speed = car.velocity.length();
        if clamped_speed > cap {
            car.velocity = car.velocity * (cap / clamped_speed);
        }

        // Verlet-style integration; torque is ignored (infinite rotational
        // inertia), so rotation advances by angular velocity directly
        car.velocity = car.velocity * (1.0 - FRICTION_AIR) + force * (DT_MS * DT_MS / MASS);
        car.angular_velocity *= 1.0 - FRICTION_AIR;
        car.rotation += car.angular_velocity;

        car.position += car.velocity;
        car.speed = car.velocity.length();

        if !car.position.is_finite() || !car.velocity.is_finite() {
            warn!(player_id = %car.player_id, "non-finite car state after step, clamping");
            car.position = prev_position;
            car.velocity = Vec2::ZERO;
            car.angular_velocity = 0.0;
            car.speed = 0.0;
        }
    }

    /// Server-side wrap into [0,W)x[0,H); the client predictor never wraps
    pub fn wrap_position(car: &mut Car, width: f64, height: f64) {
        car.position.x = wrap_mod(car.position.x, width);
        car.position.y = wrap_mod(car.position.y, height);
    }

    /// Resolve car-car contacts: positional separation plus an equal-mass
    /// elastic impulse damped by the restitution bound. Quadratic over the
    /// car set, which is fine at room sizes.
    pub fn resolve_collisions(cars: &mut [&mut Car]) -> Vec<CollisionHit> {
        let mut hits = Vec::new();

        for i in 0..cars.len() {
            for j in (i + 1)..cars.len() {
                let delta = cars[j].position - cars[i].position;
                let dist = delta.length();
                let min_dist = CAR_RADIUS * 2.0;
                if dist >= min_dist {
                    continue;
                }

                // Coincident centers: separate along an arbitrary axis
                let normal = if dist < 1e-6 {
                    Vec2::new(1.0, 0.0)
                } else {
                    delta * (1.0 / dist)
                };

                let push = (min_dist - dist) / 2.0 + 0.1;
                cars[i].position += -normal * push;
                cars[j].position += normal * push;

                let relative = cars[j].velocity - cars[i].velocity;
                let approach = relative.dot(normal);
                if approach >= 0.0 {
                    continue;
                }

                let impulse = -(1.0 + COLLISION_RESTITUTION) * approach / 2.0;
                cars[i].velocity += -normal * impulse;
                cars[j].velocity += normal * impulse;

                let impact = approach.abs();
                let damaged = impact > DAMAGE_IMPACT_THRESHOLD;
                if damaged {
                    cars[i].damage = (cars[i].damage + 1).min(3);
                    cars[j].damage = (cars[j].damage + 1).min(3);
                }

                hits.push(CollisionHit {
                    a: cars[i].player_id,
                    b: cars[j].player_id,
                    impact,
                    damaged,
                });
            }
        }

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{ElementKind, TrackElement};
    use uuid::Uuid;

    fn test_car() -> Car {
        let spawn = TrackElement::new(ElementKind::Spawn, 85.0, 90.0, 30.0, 20.0);
        Car::at_spawn(Uuid::new_v4(), &spawn)
    }

    fn accelerate_frame(sequence: u32) -> InputFrame {
        InputFrame {
            sequence,
            accelerate: true,
            ..Default::default()
        }
    }

    #[test]
    fn acceleration_moves_forward() {
        let mut car = test_car();
        // rotation 0: forward is (0, -1)
        for seq in 0..60 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        assert!(car.speed > 5.0, "speed after 1s: {}", car.speed);
        assert!(car.position.y < car.spawn_point.y);
        assert!((car.position.x - car.spawn_point.x).abs() < 1e-6);
    }

    #[test]
    fn speed_is_capped_without_nitro() {
        let mut car = test_car();
        for seq in 0..600 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        // The force lands after the clamp, so one tick of headroom exists
        assert!(car.speed <= MAX_SPEED + 1.0, "speed: {}", car.speed);
    }

    #[test]
    fn nitro_raises_the_cap_and_burns_out() {
        let mut car = test_car();
        let frame = InputFrame {
            accelerate: true,
            nitro: true,
            ..Default::default()
        };
        for _ in 0..120 {
            Integrator::step(&mut car, &frame);
        }
        assert!(car.speed > MAX_SPEED, "nitro speed: {}", car.speed);
        assert!(car.nitro < NITRO_MAX);

        // Burn it dry; the cap falls back to MAX_SPEED
        while car.nitro > 0.0 {
            Integrator::step(&mut car, &frame);
        }
        for _ in 0..120 {
            Integrator::step(&mut car, &frame);
        }
        assert!(car.speed <= MAX_SPEED + 1.0);
    }

    #[test]
    fn coasting_decays_below_threshold() {
        let mut car = test_car();
        for seq in 0..120 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        assert!(car.speed > 1.0);

        let idle = InputFrame::default();
        let mut ticks = 0;
        while car.speed >= 0.1 {
            Integrator::step(&mut car, &idle);
            ticks += 1;
            assert!(ticks < 60 * 30, "speed failed to decay: {}", car.speed);
        }
    }

    #[test]
    fn determinism_across_integrators() {
        let mut a = test_car();
        let mut b = a.clone();

        for seq in 0..300 {
            let frame = InputFrame {
                sequence: seq,
                accelerate: true,
                steer_right: seq % 3 == 0,
                nitro: seq > 100,
                ..Default::default()
            };
            Integrator::step(&mut a, &frame);
            Integrator::step(&mut b, &frame);
        }
        assert_eq!(a.position, b.position);
        assert_eq!(a.velocity, b.velocity);
        assert_eq!(a.rotation, b.rotation);
    }

    #[test]
    fn steering_does_nothing_when_stationary() {
        let mut car = test_car();
        let frame = InputFrame {
            steer_right: true,
            ..Default::default()
        };
        for _ in 0..30 {
            Integrator::step(&mut car, &frame);
        }
        assert_eq!(car.rotation, car.spawn_rotation);
    }

    #[test]
    fn steering_turns_at_speed() {
        let mut car = test_car();
        for seq in 0..60 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        let frame = InputFrame {
            accelerate: true,
            steer_right: true,
            ..Default::default()
        };
        for _ in 0..30 {
            Integrator::step(&mut car, &frame);
        }
        assert!(car.rotation > 0.1, "rotation: {}", car.rotation);
        assert!(car.angular_velocity.abs() <= MAX_ANGULAR_VELOCITY);
    }

    #[test]
    fn analog_steer_overrides_buttons() {
        let mut car = test_car();
        for seq in 0..60 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        let frame = InputFrame {
            accelerate: true,
            steer_left: true,
            steer_value: 0.5,
            ..Default::default()
        };
        Integrator::step(&mut car, &frame);
        // analog +0.5 wins over the left button, so we turn right
        assert!(car.angular_velocity > 0.0);
    }

    #[test]
    fn brake_slows_forward_motion() {
        let mut car = test_car();
        for seq in 0..60 {
            Integrator::step(&mut car, &accelerate_frame(seq));
        }
        let before = car.speed;
        let frame = InputFrame {
            brake: true,
            ..Default::default()
        };
        for _ in 0..10 {
            Integrator::step(&mut car, &frame);
        }
        assert!(car.speed < before * 0.8);
    }

    #[test]
    fn brake_reverses_from_standstill() {
        let mut car = test_car();
        let frame = InputFrame {
            brake: true,
            ..Default::default()
        };
        for _ in 0..60 {
            Integrator::step(&mut car, &frame);
        }
        // rotation 0: forward (0,-1), so reverse drives +y
        assert!(car.position.y > car.spawn_point.y);
        let fwd_speed = car.velocity.dot(forward(car.rotation));
        assert!(fwd_speed < 0.0);
    }

    #[test]
    fn wrap_keeps_position_in_bounds() {
        let mut car = test_car();
        car.position = Vec2::new(805.0, -3.0);
        Integrator::wrap_position(&mut car, 800.0, 600.0);
        assert_eq!(car.position, Vec2::new(5.0, 597.0));
    }

    #[test]
    fn collision_separates_and_bounces() {
        let spawn = TrackElement::new(ElementKind::Spawn, 0.0, 0.0, 30.0, 20.0);
        let mut a = Car::at_spawn(Uuid::new_v4(), &spawn);
        let mut b = Car::at_spawn(Uuid::new_v4(), &spawn);
        a.position = Vec2::new(100.0, 100.0);
        b.position = Vec2::new(110.0, 100.0);
        a.velocity = Vec2::new(6.0, 0.0);
        b.velocity = Vec2::new(-6.0, 0.0);

        let mut cars = [&mut a, &mut b];
        let hits = Integrator::resolve_collisions(&mut cars);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].impact > DAMAGE_IMPACT_THRESHOLD);
        assert!(hits[0].damaged);
        assert!(a.position.distance(b.position) >= CAR_RADIUS * 2.0);
        // head-on approach reverses both
        assert!(a.velocity.x < 0.0);
        assert!(b.velocity.x > 0.0);
        assert_eq!(a.damage, 1);
    }

    #[test]
    fn non_finite_state_is_clamped() {
        let mut car = test_car();
        car.velocity = Vec2::new(f64::NAN, 0.0);
        Integrator::step(&mut car, &InputFrame::default());
        assert!(car.position.is_finite());
        assert_eq!(car.velocity, Vec2::ZERO);
    }
}
