//! Core abstractions shared by the relay, dispatcher and actuators.
//!
//! - [`substrate::ArticulationSubstrate`]: Joint state accessors of the physics engine
//! - [`substrate::JointBody`]: Rigid body driven by one actuator
//! - [`types`]: Vectors, servo specifications and small value types

pub mod substrate;
pub mod types;
