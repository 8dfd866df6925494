//! SetuIO - Message bridge between a physics simulation loop and an external controller
//!
//! An external controller talks to the simulation over a pub/sub pair of TCP
//! sockets using short text messages (`TOPIC:payload`). Commands are queued
//! by a background worker and executed once per simulation tick; replies go
//! back through a second worker. Actuator setpoints take a faster path
//! straight into a latest-value cache read by per-joint PID servos.
//!
//! ## Modules
//!
//! - [`streaming`]: sockets, framing, queues and the relay workers
//! - [`protocol`]: command parsing and the per-tick dispatcher
//! - [`motion`]: setpoint cache, PID and joint actuators
//! - [`core`]: value types and the physics substrate traits
//! - [`sim`]: in-memory substrate used by the binary and tests
//! - [`app`]: fixed-step host loop

pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod motion;
pub mod protocol;
pub mod sim;
pub mod streaming;

// Re-export commonly used types
pub use app::BridgeApp;
pub use config::Config;
pub use error::{Error, Result};
