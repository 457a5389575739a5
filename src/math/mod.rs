//! 2D vector and angle primitives shared by the simulation and the client

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// 2D vector of finite floats
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance(&self, other: Vec2) -> f64 {
        (*self - other).length()
    }

    pub fn dot(&self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector, or zero when the length is degenerate
    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len < 1e-9 {
            Vec2::ZERO
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn lerp(&self, target: Vec2, t: f64) -> Vec2 {
        Vec2::new(
            self.x + (target.x - self.x) * t,
            self.y + (target.y - self.y) * t,
        )
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, scalar: f64) -> Vec2 {
        Vec2::new(self.x * scalar, self.y * scalar)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// Normalize an angle into (-PI, PI]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(std::f64::consts::TAU);
    if wrapped > std::f64::consts::PI {
        wrapped - std::f64::consts::TAU
    } else {
        wrapped
    }
}

/// Interpolate between two angles along the shortest arc
pub fn angle_lerp(from: f64, to: f64, t: f64) -> f64 {
    from + wrap_angle(to - from) * t
}

/// Positive modulo into [0, m)
pub fn wrap_mod(v: f64, m: f64) -> f64 {
    v.rem_euclid(m)
}

/// Offset (a whole number of periods) that places `to` nearest `from`.
///
/// Used to unwrap a server position broadcast in [0, period) into the
/// client's unbounded coordinate frame.
pub fn wrap_offset(from: f64, to: f64, period: f64) -> f64 {
    ((from - to) / period).round() * period
}

/// Shortest signed delta from `a` to `b` on a circle of the given period
pub fn wrap_delta(a: f64, b: f64, period: f64) -> f64 {
    let mut d = (b - a).rem_euclid(period);
    if d > period / 2.0 {
        d -= period;
    }
    d
}
