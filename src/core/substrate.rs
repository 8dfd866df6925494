//! Physics substrate traits
//!
//! The bridge never constructs a physics engine. The host attaches one by
//! implementing these traits; the dispatcher and actuators only go through
//! the accessors below.
//!
//! Reads are fallible as well as writes: a substrate that cannot serve a
//! query reports an error and the dispatcher turns it into an `ERROR:` reply.

use crate::core::types::{ExternalForces, Vec3};
use crate::error::Result;

/// Joint state access for an articulated body
///
/// All vectors are indexed by degree of freedom, in the substrate's order.
pub trait ArticulationSubstrate {
    /// Number of degrees of freedom
    fn dof_count(&self) -> usize;

    /// Current joint positions
    fn joint_positions(&self) -> Result<Vec<f32>>;

    /// Overwrite joint positions
    fn set_joint_positions(&mut self, positions: &[f32]) -> Result<()>;

    /// Current joint velocities
    fn joint_velocities(&self) -> Result<Vec<f32>>;

    /// Overwrite joint velocities
    fn set_joint_velocities(&mut self, velocities: &[f32]) -> Result<()>;

    /// Current joint force vector (forces applied by the host)
    fn joint_forces(&self) -> Result<Vec<f32>>;

    /// Overwrite the joint force vector
    fn set_joint_forces(&mut self, forces: &[f32]) -> Result<()>;

    /// Estimate external forces acting on each DOF over `window` seconds
    fn joint_external_forces(&self, window: f32) -> Result<ExternalForces>;

    /// Index of the first DOF of every link
    fn dof_start_indices(&self) -> Result<Vec<i32>>;

    /// Fixed timestep of the integrator (seconds)
    fn fixed_timestep(&self) -> Result<f32>;
}

/// Rigid body driven by a single joint actuator
pub trait JointBody {
    /// Angular velocity in world frame (rad/s)
    fn angular_velocity(&self) -> Vec3;

    /// Overwrite the angular velocity
    fn set_angular_velocity(&mut self, velocity: Vec3);

    /// Accumulate a torque to be applied on the next integration step
    fn add_torque(&mut self, torque: Vec3);

    /// Configure mass and a diagonal inertia tensor
    fn set_mass_properties(&mut self, mass: f32, inertia: Vec3);
}
