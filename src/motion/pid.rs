//! Continuous PID controller state

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl PidGains {
    pub const fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self::new(0.05, 0.02, 0.0)
    }
}

/// One PID evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidStep {
    pub error: f32,
    pub integral: f32,
    pub derivative: f32,
    pub output: f32,
}

/// Integral accumulator and previous error of one controller
///
/// Never reset implicitly; call [`PidState::reset`] to clear windup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    integral: f32,
    prev_error: f32,
}

impl PidState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the controller by one fixed step
    ///
    /// `dt` must be finite and positive; otherwise the state is left untouched
    /// and [`Error::InvalidTimestep`] is returned.
    pub fn step(
        &mut self,
        gains: &PidGains,
        target: f32,
        measured: f32,
        dt: f32,
    ) -> Result<PidStep> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::InvalidTimestep(dt));
        }

        let error = target - measured;
        self.integral += error * dt;
        let derivative = (error - self.prev_error) / dt;
        let output = gains.p * error + gains.i * self.integral + gains.d * derivative;
        self.prev_error = error;

        Ok(PidStep {
            error,
            integral: self.integral,
            derivative,
            output,
        })
    }

    #[inline]
    pub fn integral(&self) -> f32 {
        self.integral
    }

    #[inline]
    pub fn prev_error(&self) -> f32 {
        self.prev_error
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pid = PidState::new();
        let step = pid
            .step(&PidGains::new(1.0, 0.0, 0.0), 5.0, 0.0, 0.02)
            .unwrap();
        assert_eq!(step.error, 5.0);
        assert_eq!(step.output, 5.0);
        assert_eq!(pid.prev_error(), 5.0);
    }

    #[test]
    fn test_integral_accumulates() {
        let mut pid = PidState::new();
        let gains = PidGains::new(0.0, 1.0, 0.0);
        for _ in 0..10 {
            pid.step(&gains, 1.0, 0.0, 0.1).unwrap();
        }
        assert!((pid.integral() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_derivative_uses_previous_error() {
        let mut pid = PidState::new();
        let gains = PidGains::new(0.0, 0.0, 1.0);

        // First step: previous error is zero
        let first = pid.step(&gains, 2.0, 0.0, 0.5).unwrap();
        assert!((first.derivative - 4.0).abs() < 1e-6);

        // Error unchanged: derivative vanishes
        let second = pid.step(&gains, 2.0, 0.0, 0.5).unwrap();
        assert!(second.derivative.abs() < 1e-6);
    }

    #[test]
    fn test_invalid_dt_leaves_state_untouched() {
        let mut pid = PidState::new();
        let gains = PidGains::new(1.0, 1.0, 1.0);
        pid.step(&gains, 1.0, 0.0, 0.02).unwrap();
        let before = pid;

        assert!(matches!(
            pid.step(&gains, 1.0, 0.0, 0.0),
            Err(Error::InvalidTimestep(_))
        ));
        assert!(pid.step(&gains, 1.0, 0.0, -0.01).is_err());
        assert!(pid.step(&gains, 1.0, 0.0, f32::NAN).is_err());
        assert_eq!(pid, before);
    }

    #[test]
    fn test_reset() {
        let mut pid = PidState::new();
        pid.step(&PidGains::default(), 3.0, 1.0, 0.02).unwrap();
        pid.reset();
        assert_eq!(pid, PidState::default());
    }
}
