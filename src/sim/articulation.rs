//! In-memory articulated body
//!
//! Each DOF is an independent unit with viscous damping, integrated with
//! explicit Euler on the fixed step:
//!
//! ```text
//! a = (force - damping·v) / inertia
//! v' = v + a·dt
//! x' = x + v'·dt
//! ```
//!
//! Forces persist between steps; the controller adjusts them through
//! `SET_JOINT_FORCES`. The external force estimate is the residual between
//! the observed acceleration and the modelled forces over the last step:
//!
//! ```text
//! external = inertia·(v - v_prev)/window - force + damping·v_prev
//! ```

use crate::core::substrate::ArticulationSubstrate;
use crate::core::types::ExternalForces;
use crate::error::{Error, Result};

pub struct SimArticulation {
    positions: Vec<f32>,
    velocities: Vec<f32>,
    /// Velocities before the last step
    prev_velocities: Vec<f32>,
    forces: Vec<f32>,
    dof_start_indices: Vec<i32>,
    damping: f32,
    inertia: f32,
    fixed_timestep: f32,
    steps: u64,
}

impl SimArticulation {
    /// Create an articulation at rest
    ///
    /// `links` lists the DOF count of every link; empty means one DOF per
    /// link. The counts must add up to `dof_count`.
    pub fn new(
        dof_count: usize,
        links: &[usize],
        damping: f32,
        inertia: f32,
        fixed_timestep: f32,
    ) -> Result<Self> {
        if dof_count == 0 {
            return Err(Error::InvalidParameter(
                "articulation needs at least one DOF".to_string(),
            ));
        }
        if !(fixed_timestep > 0.0) || !fixed_timestep.is_finite() {
            return Err(Error::InvalidTimestep(fixed_timestep));
        }
        if !(inertia > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "joint inertia must be > 0, got {}",
                inertia
            )));
        }
        if damping < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "damping must be >= 0, got {}",
                damping
            )));
        }

        let dof_start_indices = if links.is_empty() {
            (0..dof_count as i32).collect()
        } else {
            let total: usize = links.iter().sum();
            if total != dof_count {
                return Err(Error::InvalidParameter(format!(
                    "links cover {} DOF but articulation has {}",
                    total, dof_count
                )));
            }
            let mut start = 0i32;
            links
                .iter()
                .map(|&dofs| {
                    let index = start;
                    start += dofs as i32;
                    index
                })
                .collect()
        };

        Ok(Self {
            positions: vec![0.0; dof_count],
            velocities: vec![0.0; dof_count],
            prev_velocities: vec![0.0; dof_count],
            forces: vec![0.0; dof_count],
            dof_start_indices,
            damping,
            inertia,
            fixed_timestep,
            steps: 0,
        })
    }

    /// Number of completed integration steps
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Advance by one fixed step
    pub fn step(&mut self) {
        let dt = self.fixed_timestep;
        self.prev_velocities.copy_from_slice(&self.velocities);

        for i in 0..self.positions.len() {
            let acc = (self.forces[i] - self.damping * self.velocities[i]) / self.inertia;
            self.velocities[i] += acc * dt;
            self.positions[i] += self.velocities[i] * dt;
        }
        self.steps += 1;
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.positions.len() {
            return Err(Error::Substrate(format!(
                "{} vector has {} entries, expected {}",
                what,
                len,
                self.positions.len()
            )));
        }
        Ok(())
    }
}

impl ArticulationSubstrate for SimArticulation {
    fn dof_count(&self) -> usize {
        self.positions.len()
    }

    fn joint_positions(&self) -> Result<Vec<f32>> {
        Ok(self.positions.clone())
    }

    fn set_joint_positions(&mut self, positions: &[f32]) -> Result<()> {
        self.check_len("position", positions.len())?;
        self.positions.copy_from_slice(positions);
        Ok(())
    }

    fn joint_velocities(&self) -> Result<Vec<f32>> {
        Ok(self.velocities.clone())
    }

    fn set_joint_velocities(&mut self, velocities: &[f32]) -> Result<()> {
        self.check_len("velocity", velocities.len())?;
        self.velocities.copy_from_slice(velocities);
        Ok(())
    }

    fn joint_forces(&self) -> Result<Vec<f32>> {
        Ok(self.forces.clone())
    }

    fn set_joint_forces(&mut self, forces: &[f32]) -> Result<()> {
        self.check_len("force", forces.len())?;
        self.forces.copy_from_slice(forces);
        Ok(())
    }

    fn joint_external_forces(&self, window: f32) -> Result<ExternalForces> {
        let forces = if window > 0.0 {
            (0..self.positions.len())
                .map(|i| {
                    let dv = self.velocities[i] - self.prev_velocities[i];
                    self.inertia * dv / window - self.forces[i]
                        + self.damping * self.prev_velocities[i]
                })
                .collect()
        } else {
            vec![0.0; self.positions.len()]
        };

        Ok(ExternalForces {
            dof_count: self.positions.len(),
            forces,
        })
    }

    fn dof_start_indices(&self) -> Result<Vec<i32>> {
        Ok(self.dof_start_indices.clone())
    }

    fn fixed_timestep(&self) -> Result<f32> {
        Ok(self.fixed_timestep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dof_start_indices() {
        let sim = SimArticulation::new(6, &[1, 3, 2], 0.0, 1.0, 0.02).unwrap();
        assert_eq!(sim.dof_start_indices().unwrap(), vec![0, 1, 4]);

        let sim = SimArticulation::new(3, &[], 0.0, 1.0, 0.02).unwrap();
        assert_eq!(sim.dof_start_indices().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(SimArticulation::new(0, &[], 0.0, 1.0, 0.02).is_err());
        assert!(SimArticulation::new(2, &[], 0.0, 1.0, 0.0).is_err());
        assert!(SimArticulation::new(2, &[], 0.0, 0.0, 0.02).is_err());
        assert!(SimArticulation::new(2, &[3], 0.0, 1.0, 0.02).is_err());
    }

    #[test]
    fn test_setter_length_mismatch() {
        let mut sim = SimArticulation::new(2, &[], 0.0, 1.0, 0.02).unwrap();
        assert!(matches!(
            sim.set_joint_forces(&[1.0]),
            Err(Error::Substrate(_))
        ));
        assert!(sim.set_joint_positions(&[1.0, 2.0, 3.0]).is_err());
        assert_eq!(sim.joint_forces().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_constant_force_accelerates() {
        let mut sim = SimArticulation::new(1, &[], 0.0, 2.0, 0.5).unwrap();
        sim.set_joint_forces(&[4.0]).unwrap();

        sim.step();
        // a = 2, v = 1, x = 0.5
        assert!((sim.joint_velocities().unwrap()[0] - 1.0).abs() < 1e-6);
        assert!((sim.joint_positions().unwrap()[0] - 0.5).abs() < 1e-6);
        assert_eq!(sim.step_count(), 1);
    }

    #[test]
    fn test_external_force_residual() {
        let mut sim = SimArticulation::new(1, &[], 0.5, 1.0, 0.1).unwrap();
        sim.set_joint_forces(&[1.0]).unwrap();
        sim.step();

        // Pure model motion leaves no residual
        let ext = sim.joint_external_forces(0.1).unwrap();
        assert_eq!(ext.dof_count, 1);
        assert!(ext.forces[0].abs() < 1e-4);

        // An unmodelled velocity kick shows up as an external force
        let kicked = sim.joint_velocities().unwrap()[0] + 0.1;
        sim.set_joint_velocities(&[kicked]).unwrap();
        let ext = sim.joint_external_forces(0.1).unwrap();
        assert!(ext.forces[0] > 0.9);
    }
}
