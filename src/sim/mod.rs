//! Simulated physics substrate
//!
//! Deterministic stand-ins for a physics engine so the bridge can run and be
//! tested without one. Nothing in the relay, dispatcher or actuator path
//! depends on these types; they only implement the substrate traits.

pub mod articulation;
pub mod joint;

pub use articulation::SimArticulation;
pub use joint::SimJoint;
