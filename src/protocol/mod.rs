//! Text command protocol spoken with the external controller
//!
//! - `codec`: comma-separated number lists
//! - `command`: topic parsing and the command set
//! - `dispatcher`: per-tick execution against the substrate

pub mod codec;
pub mod command;
pub mod dispatcher;

pub use command::{Command, ProtocolError};
pub use dispatcher::{Dispatcher, TickReport, handle_message};
