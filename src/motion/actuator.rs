//! Per-joint servo actuator
//!
//! Each fixed step the actuator reads its latest setpoint, runs one PID
//! evaluation against the measured angular velocity about its axis, converts
//! the controller output into torque using the servo rating, applies it and
//! clamps the body's angular speed to the servo's rated speed:
//!
//! ```text
//! error      = target - measured
//! output     = P·error + I·∫error + D·d(error)/dt
//! torque     = output · rated_torque / voltage_rating
//! |ω|        ≤ rated_speed · 2π/60
//! ```

use super::pid::{PidState, PidStep};
use super::setpoint::Setpoint;
use crate::core::substrate::JointBody;
use crate::core::types::{ServoSpec, Vec3};
use crate::error::{Error, Result};

/// Result of one actuator step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorOutput {
    pub pid: PidStep,
    /// Torque magnitude about the actuation axis (N·m)
    pub torque: f32,
}

/// PID-driven servo attached to one joint body
#[derive(Debug, Clone)]
pub struct JointActuator {
    joint_id: usize,
    servo: ServoSpec,
    axis: Vec3,
    pid: PidState,
}

impl JointActuator {
    /// Create an actuator for `joint_id` turning about `axis`
    pub fn new(joint_id: usize, servo: ServoSpec, axis: Vec3) -> Result<Self> {
        let axis = axis.normalized().ok_or_else(|| {
            Error::InvalidParameter(format!("joint {}: actuation axis must be non-zero", joint_id))
        })?;
        if !(servo.voltage_rating > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "joint {}: voltage rating must be > 0",
                joint_id
            )));
        }

        Ok(Self {
            joint_id,
            servo,
            axis,
            pid: PidState::new(),
        })
    }

    pub fn joint_id(&self) -> usize {
        self.joint_id
    }

    pub fn servo(&self) -> &ServoSpec {
        &self.servo
    }

    /// Unit actuation axis
    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    pub fn pid_state(&self) -> &PidState {
        &self.pid
    }

    /// Configure the body's mass properties from the servo rating
    pub fn attach(&self, body: &mut dyn JointBody) {
        let inertia = self.servo.inertia;
        body.set_mass_properties(self.servo.weight, Vec3::new(inertia, inertia, inertia));
        log::debug!(
            "Actuator {} attached: mass={}kg inertia={}kg·m² max_speed={:.3}rad/s",
            self.joint_id,
            self.servo.weight,
            inertia,
            self.servo.max_angular_speed()
        );
    }

    /// Run one fixed step
    ///
    /// Fails with [`Error::InvalidTimestep`] for `dt <= 0`; the body and the
    /// controller state are left untouched in that case.
    pub fn step(
        &mut self,
        setpoint: &Setpoint,
        body: &mut dyn JointBody,
        dt: f32,
    ) -> Result<ActuatorOutput> {
        let measured = body.angular_velocity().dot(self.axis);
        let pid = self.pid.step(&setpoint.gains, setpoint.target, measured, dt)?;

        let torque = pid.output * self.servo.rated_torque / self.servo.voltage_rating;
        body.add_torque(self.axis * torque);

        let max_speed = self.servo.max_angular_speed();
        body.set_angular_velocity(body.angular_velocity().clamp_length(max_speed));

        log::trace!(
            "Actuator {}: target={:.3} measured={:.3} output={:.4} torque={:.4}",
            self.joint_id,
            setpoint.target,
            measured,
            pid.output,
            torque
        );

        Ok(ActuatorOutput { pid, torque })
    }
}
