//! Core value types for joints and servos.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// Conversion factor from revolutions per minute to rad/s
pub const RPM_TO_RADS: f32 = 2.0 * std::f32::consts::PI / 60.0;

/// 3D vector used for angular velocity, torque and axes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    /// Unit Z axis (the default actuation axis)
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a zero vector
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len > f32::EPSILON {
            Some(self * (1.0 / len))
        } else {
            None
        }
    }

    /// Scale the vector down so its length does not exceed `max_length`.
    pub fn clamp_length(self, max_length: f32) -> Vec3 {
        let len = self.length();
        if len > max_length && len > 0.0 {
            self * (max_length / len)
        } else {
            self
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(v: [f32; 3]) -> Self {
        Vec3::new(v[0], v[1], v[2])
    }
}

/// External force estimate returned by the substrate
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalForces {
    /// Effective DOF count reported by the substrate
    pub dof_count: usize,
    /// Per-DOF force estimate
    pub forces: Vec<f32>,
}

/// Servo motor rating used to convert controller output into torque
///
/// Defaults describe a small hobby servo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoSpec {
    /// Rated torque (N·m)
    pub rated_torque: f32,
    /// Rated speed (RPM)
    pub rated_speed: f32,
    /// Voltage rating (V)
    pub voltage_rating: f32,
    /// Rotational inertia (kg·m²)
    pub inertia: f32,
    /// Mass (kg)
    pub weight: f32,
}

impl Default for ServoSpec {
    fn default() -> Self {
        Self {
            rated_torque: 0.5,
            rated_speed: 60.0,
            voltage_rating: 6.0,
            inertia: 0.01,
            weight: 0.1,
        }
    }
}

impl ServoSpec {
    /// Maximum angular speed in rad/s
    #[inline]
    pub fn max_angular_speed(&self) -> f32 {
        self.rated_speed * RPM_TO_RADS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_length() {
        let v = Vec3::new(3.0, 4.0, 0.0);
        let clamped = v.clamp_length(2.5);
        assert!((clamped.length() - 2.5).abs() < 1e-6);
        assert!((clamped.x - 1.5).abs() < 1e-6);
        assert!((clamped.y - 2.0).abs() < 1e-6);

        // Already within limit
        assert_eq!(v.clamp_length(10.0), v);
        assert_eq!(Vec3::ZERO.clamp_length(1.0), Vec3::ZERO);
    }

    #[test]
    fn test_normalized() {
        assert!(Vec3::ZERO.normalized().is_none());
        let n = Vec3::new(0.0, 0.0, 2.0).normalized().unwrap();
        assert_eq!(n, Vec3::FORWARD);
    }

    #[test]
    fn test_servo_defaults() {
        let spec = ServoSpec::default();
        assert!((spec.max_angular_speed() - 2.0 * std::f32::consts::PI).abs() < 1e-5);
        assert_eq!(spec.voltage_rating, 6.0);
    }
}
