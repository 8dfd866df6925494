//! Latest-value setpoint cache
//!
//! Setpoints reach the actuators on a path that bypasses the ingress queue:
//! the subscriber worker writes them straight into this cache and the tick
//! thread reads them at the start of every fixed step.
//!
//! Every field is an independent atomic word. A reader may observe fields
//! from two consecutive updates during one step; that staleness is bounded
//! by a single message and is tolerated by the controller.
//!
//! # Inbound Formats
//!
//! | Form | Example |
//! |------|---------|
//! | Text | `SET_MOTOR_PARAMS:0,0.05,0.02,0.0,1.5` (id, P, I, D, target) |
//! | JSON | `{"motor_id":0,"P":0.05,"I":0.02,"D":0.0,"target":1.5}` |

use crate::error::{Error, Result};
use crate::motion::pid::PidGains;
use crate::protocol::codec::{parse_f32, parse_field};
use crate::protocol::command::ProtocolError;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Topic of text-form setpoint messages
pub const SETPOINT_TOPIC: &str = "SET_MOTOR_PARAMS";

/// Atomic f32 wrapper using AtomicU32
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Gains and target velocity for one joint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoint {
    pub gains: PidGains,
    /// Target angular velocity (rad/s)
    pub target: f32,
}

/// A setpoint addressed to a joint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointUpdate {
    pub joint_id: i64,
    pub setpoint: Setpoint,
}

struct SetpointSlot {
    p: AtomicF32,
    i: AtomicF32,
    d: AtomicF32,
    target: AtomicF32,
}

impl SetpointSlot {
    fn new(initial: Setpoint) -> Self {
        Self {
            p: AtomicF32::new(initial.gains.p),
            i: AtomicF32::new(initial.gains.i),
            d: AtomicF32::new(initial.gains.d),
            target: AtomicF32::new(initial.target),
        }
    }
}

/// One overwritten slot per joint, shared between the subscriber worker and the tick thread
///
/// Joints without an actuator have no slot; setpoints addressed to them are
/// rejected.
pub struct SetpointCache {
    slots: Vec<Option<SetpointSlot>>,
    updates: AtomicU64,
}

impl SetpointCache {
    /// Create a cache indexed by joint id
    ///
    /// `None` marks a joint that has no actuator.
    pub fn new(initial: Vec<Option<Setpoint>>) -> Self {
        Self {
            slots: initial
                .into_iter()
                .map(|setpoint| setpoint.map(SetpointSlot::new))
                .collect(),
            updates: AtomicU64::new(0),
        }
    }

    /// Create a cache where all `joint_count` joints are actuated with the same setpoint
    pub fn uniform(joint_count: usize, setpoint: Setpoint) -> Self {
        Self::new(vec![Some(setpoint); joint_count])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of accepted updates
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Whether the joint has an actuator that reads this cache
    pub fn is_actuated(&self, joint_id: usize) -> bool {
        matches!(self.slots.get(joint_id), Some(Some(_)))
    }

    /// Read the latest setpoint for a joint
    pub fn load(&self, joint_id: usize) -> Option<Setpoint> {
        let slot = self.slots.get(joint_id)?.as_ref()?;
        Some(Setpoint {
            gains: PidGains {
                p: slot.p.load(Ordering::Acquire),
                i: slot.i.load(Ordering::Acquire),
                d: slot.d.load(Ordering::Acquire),
            },
            target: slot.target.load(Ordering::Acquire),
        })
    }

    /// Overwrite the setpoint of a joint (last write wins)
    pub fn store(&self, joint_id: i64, setpoint: Setpoint) -> Result<()> {
        let slot = usize::try_from(joint_id)
            .ok()
            .and_then(|id| self.slots.get(id))
            .ok_or(Error::JointOutOfRange {
                id: joint_id,
                count: self.slots.len(),
            })?
            .as_ref()
            .ok_or(Error::NoActuator(joint_id))?;

        slot.p.store(setpoint.gains.p, Ordering::Release);
        slot.i.store(setpoint.gains.i, Ordering::Release);
        slot.d.store(setpoint.gains.d, Ordering::Release);
        slot.target.store(setpoint.target, Ordering::Release);
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn apply(&self, update: &SetpointUpdate) -> Result<()> {
        self.store(update.joint_id, update.setpoint)
    }
}

/// JSON form of a setpoint message
#[derive(Debug, Deserialize)]
struct MotorData {
    motor_id: i64,
    #[serde(rename = "P")]
    p: f32,
    #[serde(rename = "I")]
    i: f32,
    #[serde(rename = "D")]
    d: f32,
    target: f32,
}

/// Recognize and parse a setpoint message
///
/// Returns `None` when the message is not a setpoint and should go to the
/// command queue instead.
pub fn parse_setpoint(message: &str) -> Option<std::result::Result<SetpointUpdate, ProtocolError>> {
    let trimmed = message.trim_start();
    if trimmed.starts_with('{') {
        return Some(parse_json_setpoint(trimmed));
    }

    let (topic, payload) = match message.split_once(':') {
        Some((topic, payload)) => (topic, Some(payload)),
        None => (message, None),
    };
    if topic != SETPOINT_TOPIC {
        return None;
    }

    let Some(payload) = payload else {
        return Some(Err(ProtocolError::MissingPayload(SETPOINT_TOPIC.to_string())));
    };
    Some(parse_text_setpoint(payload))
}

fn parse_text_setpoint(payload: &str) -> std::result::Result<SetpointUpdate, ProtocolError> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != 5 {
        return Err(ProtocolError::FieldCount {
            topic: SETPOINT_TOPIC.to_string(),
            expected: 5,
            actual: fields.len(),
        });
    }

    let joint_id: i64 = parse_field(fields[0], 0)?;
    let values = fields[1..]
        .iter()
        .enumerate()
        .map(|(k, field)| parse_f32(field, k + 1))
        .collect::<std::result::Result<Vec<f32>, ProtocolError>>()?;

    Ok(SetpointUpdate {
        joint_id,
        setpoint: Setpoint {
            gains: PidGains::new(values[0], values[1], values[2]),
            target: values[3],
        },
    })
}

fn parse_json_setpoint(message: &str) -> std::result::Result<SetpointUpdate, ProtocolError> {
    let data: MotorData = serde_json::from_str(message)
        .map_err(|e| ProtocolError::InvalidSetpoint(e.to_string()))?;

    if ![data.p, data.i, data.d, data.target]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(ProtocolError::InvalidSetpoint(
            "non-finite gain or target".to_string(),
        ));
    }

    Ok(SetpointUpdate {
        joint_id: data.motor_id,
        setpoint: Setpoint {
            gains: PidGains::new(data.p, data.i, data.d),
            target: data.target,
        },
    })
}
