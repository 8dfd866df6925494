//! Configuration for SetuIO
//!
//! Loads configuration from a TOML file. Every field has a default, so an
//! empty file (or no file at all) gives a working loopback setup.
//!
//! ```toml
//! [transport]
//! publisher_address = "tcp://*:5555"
//! subscriber_address = "tcp://*:5556"
//! subscriptions = [""]
//!
//! [dispatcher]
//! max_messages_per_tick = 256
//!
//! [simulation]
//! fixed_timestep = 0.02
//! dof_count = 2
//!
//! [[actuators]]
//! id = 0
//! p = 0.05
//! i = 0.02
//! target = 1.0
//!
//! [actuators.servo]
//! rated_torque = 0.5
//! ```

use crate::core::types::ServoSpec;
use crate::error::{Error, Result};
use crate::motion::{PidGains, Setpoint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub dispatcher: DispatcherConfig,
    pub simulation: SimulationConfig,
    pub actuators: Vec<ActuatorConfig>,
    pub logging: LoggingConfig,
}

/// Socket endpoints and worker timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bind address for outbound replies
    ///
    /// Examples:
    /// - `tcp://*:5555` - all interfaces on port 5555
    /// - `127.0.0.1:5555` - localhost only
    pub publisher_address: String,

    /// Bind address for inbound commands and setpoints
    pub subscriber_address: String,

    /// Topic prefixes accepted by the subscriber ("" = everything)
    pub subscriptions: Vec<String>,

    /// How long teardown waits for each worker before abandoning it
    pub join_timeout_ms: u64,

    /// Upper bound on how long the publisher blocks waiting for a reply
    pub poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            publisher_address: "127.0.0.1:5555".to_string(),
            subscriber_address: "127.0.0.1:5556".to_string(),
            subscriptions: vec![String::new()],
            join_timeout_ms: 100,
            poll_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Messages handled per tick; 0 drains the queue every tick
    pub max_messages_per_tick: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_messages_per_tick: 256,
        }
    }
}

/// Simulated articulation parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed step (seconds)
    pub fixed_timestep: f32,
    pub dof_count: usize,
    /// DOF per link; empty means one DOF per link
    pub links: Vec<usize>,
    /// Viscous damping coefficient
    pub damping: f32,
    pub joint_inertia: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 0.02,
            dof_count: 6,
            links: Vec::new(),
            damping: 0.1,
            joint_inertia: 1.0,
        }
    }
}

/// One servo-driven joint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Joint id (index into the articulation's DOF)
    pub id: usize,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    /// Initial target angular velocity (rad/s)
    pub target: f32,
    /// Actuation axis
    pub axis: [f32; 3],
    pub servo: ServoSpec,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        let gains = PidGains::default();
        Self {
            id: 0,
            p: gains.p,
            i: gains.i,
            d: gains.d,
            target: 0.0,
            axis: [0.0, 0.0, 1.0],
            servo: ServoSpec::default(),
        }
    }
}

impl ActuatorConfig {
    /// Initial setpoint for the cache
    pub fn setpoint(&self) -> Setpoint {
        Setpoint {
            gains: PidGains::new(self.p, self.i, self.d),
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if !(sim.fixed_timestep > 0.0) || !sim.fixed_timestep.is_finite() {
            return Err(Error::Config(format!(
                "simulation.fixed_timestep must be > 0, got {}",
                sim.fixed_timestep
            )));
        }
        if sim.dof_count == 0 {
            return Err(Error::Config(
                "simulation.dof_count must be at least 1".to_string(),
            ));
        }
        if !sim.links.is_empty() && sim.links.iter().sum::<usize>() != sim.dof_count {
            return Err(Error::Config(format!(
                "simulation.links cover {} DOF but dof_count is {}",
                sim.links.iter().sum::<usize>(),
                sim.dof_count
            )));
        }
        if !(sim.joint_inertia > 0.0) {
            return Err(Error::Config(
                "simulation.joint_inertia must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for actuator in &self.actuators {
            if !seen.insert(actuator.id) {
                return Err(Error::Config(format!(
                    "duplicate actuator id {}",
                    actuator.id
                )));
            }
            if actuator.id >= sim.dof_count {
                return Err(Error::Config(format!(
                    "actuator id {} out of range (dof_count {})",
                    actuator.id, sim.dof_count
                )));
            }
            if !(actuator.servo.voltage_rating > 0.0) {
                return Err(Error::Config(format!(
                    "actuator {}: servo.voltage_rating must be > 0",
                    actuator.id
                )));
            }
            if !(actuator.servo.inertia > 0.0) {
                return Err(Error::Config(format!(
                    "actuator {}: servo.inertia must be > 0",
                    actuator.id
                )));
            }
        }
        Ok(())
    }
}
