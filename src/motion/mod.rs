//! Joint actuation subsystem

pub mod actuator;
pub mod pid;
pub mod setpoint;

pub use actuator::{ActuatorOutput, JointActuator};
pub use pid::{PidGains, PidState};
pub use setpoint::{Setpoint, SetpointCache, SetpointUpdate, parse_setpoint};
