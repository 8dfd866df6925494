//! Single rigid body driven by a joint actuator

use crate::core::substrate::JointBody;
use crate::core::types::Vec3;

/// Rigid body with a diagonal inertia tensor and linear angular friction
#[derive(Debug, Clone)]
pub struct SimJoint {
    angular_velocity: Vec3,
    mass: f32,
    inertia: Vec3,
    pending_torque: Vec3,
    /// Fraction of angular velocity lost per second
    friction: f32,
}

impl SimJoint {
    pub fn new(friction: f32) -> Self {
        Self {
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            inertia: Vec3::new(1.0, 1.0, 1.0),
            pending_torque: Vec3::ZERO,
            friction: friction.max(0.0),
        }
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inertia(&self) -> Vec3 {
        self.inertia
    }

    /// Torque accumulated since the last integration
    pub fn pending_torque(&self) -> Vec3 {
        self.pending_torque
    }

    /// Apply accumulated torque over `dt`, then friction
    pub fn integrate(&mut self, dt: f32) {
        let t = self.pending_torque;
        let acc = Vec3::new(
            safe_div(t.x, self.inertia.x),
            safe_div(t.y, self.inertia.y),
            safe_div(t.z, self.inertia.z),
        );
        let decay = (1.0 - self.friction * dt).clamp(0.0, 1.0);
        self.angular_velocity = (self.angular_velocity + acc * dt) * decay;
        self.pending_torque = Vec3::ZERO;
    }
}

impl Default for SimJoint {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[inline]
fn safe_div(num: f32, den: f32) -> f32 {
    if den > 0.0 { num / den } else { 0.0 }
}

impl JointBody for SimJoint {
    fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    fn add_torque(&mut self, torque: Vec3) {
        self.pending_torque = self.pending_torque + torque;
    }

    fn set_mass_properties(&mut self, mass: f32, inertia: Vec3) {
        self.mass = mass;
        self.inertia = inertia;
    }
}
