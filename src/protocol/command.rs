//! Command set accepted from the external controller
//!
//! Every message is `TOPIC` or `TOPIC:PAYLOAD`; the topic ends at the first
//! colon and is matched exactly.
//!
//! | Topic | Payload | Reply |
//! |-------|---------|-------|
//! | `SET_JOINT_FORCES` | `f0,f1,...` deltas | `SET_JOINT_FORCES:OK` |
//! | `GET_DOF_START_INDICES` | - | `GET_DOF_START_INDICES:i0,i1,...` |
//! | `GET_JOINT_POSITIONS` | - | `GET_JOINT_POSITIONS:p0,p1,...` |
//! | `GET_JOINT_VELOCITIES` | - | `GET_JOINT_VELOCITIES:v0,v1,...` |
//! | `GET_JOINT_FORCES` | - | `GET_JOINT_FORCES:f0,f1,...` |
//! | `GET_JOINT_EXTERNAL_FORCES` | - | `GET_JOINT_EXTERNAL_FORCES:count,e0,e1,...` |
//!
//! Failures reply `ERROR:<message>`.

use super::codec::parse_f32_list;

pub const SET_JOINT_FORCES: &str = "SET_JOINT_FORCES";
pub const GET_DOF_START_INDICES: &str = "GET_DOF_START_INDICES";
pub const GET_JOINT_POSITIONS: &str = "GET_JOINT_POSITIONS";
pub const GET_JOINT_VELOCITIES: &str = "GET_JOINT_VELOCITIES";
pub const GET_JOINT_FORCES: &str = "GET_JOINT_FORCES";
pub const GET_JOINT_EXTERNAL_FORCES: &str = "GET_JOINT_EXTERNAL_FORCES";

/// Reply topic for failed commands
pub const ERROR_TOPIC: &str = "ERROR";

/// Per-message failure; the `Display` text follows `ERROR:` in the reply
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown command:{0}")]
    UnknownCommand(String),

    #[error("{0} requires a payload")]
    MissingPayload(String),

    #[error("Invalid number '{value}' at field {index}")]
    InvalidNumber { value: String, index: usize },

    #[error("{topic} expects {expected} fields, got {actual}")]
    FieldCount {
        topic: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid setpoint: {0}")]
    InvalidSetpoint(String),

    /// Substrate rejected the command
    #[error("{0}")]
    Execution(String),
}

impl From<crate::error::Error> for ProtocolError {
    fn from(e: crate::error::Error) -> Self {
        ProtocolError::Execution(e.to_string())
    }
}

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Add deltas to the joint force vector
    SetJointForces(Vec<f32>),
    GetDofStartIndices,
    GetJointPositions,
    GetJointVelocities,
    GetJointForces,
    GetJointExternalForces,
}

impl Command {
    /// Parse a raw `TOPIC:PAYLOAD` message
    ///
    /// Query commands ignore any payload.
    pub fn parse(message: &str) -> Result<Command, ProtocolError> {
        let (topic, payload) = split_message(message);

        match topic {
            SET_JOINT_FORCES => {
                let payload = payload
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| ProtocolError::MissingPayload(SET_JOINT_FORCES.to_string()))?;
                Ok(Command::SetJointForces(parse_f32_list(payload)?))
            }
            GET_DOF_START_INDICES => Ok(Command::GetDofStartIndices),
            GET_JOINT_POSITIONS => Ok(Command::GetJointPositions),
            GET_JOINT_VELOCITIES => Ok(Command::GetJointVelocities),
            GET_JOINT_FORCES => Ok(Command::GetJointForces),
            GET_JOINT_EXTERNAL_FORCES => Ok(Command::GetJointExternalForces),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Topic the reply is published under
    pub fn topic(&self) -> &'static str {
        match self {
            Command::SetJointForces(_) => SET_JOINT_FORCES,
            Command::GetDofStartIndices => GET_DOF_START_INDICES,
            Command::GetJointPositions => GET_JOINT_POSITIONS,
            Command::GetJointVelocities => GET_JOINT_VELOCITIES,
            Command::GetJointForces => GET_JOINT_FORCES,
            Command::GetJointExternalForces => GET_JOINT_EXTERNAL_FORCES,
        }
    }
}

/// Split a message at the first colon into topic and optional payload
pub fn split_message(message: &str) -> (&str, Option<&str>) {
    match message.split_once(':') {
        Some((topic, payload)) => (topic, Some(payload)),
        None => (message, None),
    }
}

/// Format an error reply
pub fn error_reply(error: &ProtocolError) -> String {
    format!("{}:{}", ERROR_TOPIC, error)
}
