//! Per-tick command dispatcher
//!
//! Runs on the tick thread. Each [`Dispatcher::tick`] pops up to
//! `max_messages_per_tick` messages from the ingress queue, executes them
//! against the substrate and pushes one reply per message to the egress
//! queue. Messages beyond the budget stay queued for the next tick.
//! Nothing here blocks: queue operations are non-blocking and replies are
//! handed off without waiting for the publisher.
//!
//! A failing or panicking substrate only fails the message being handled;
//! the rest of the tick goes on.

use super::codec::format_list;
use super::command::{Command, ProtocolError, SET_JOINT_FORCES, error_reply};
use crate::core::substrate::ArticulationSubstrate;
use crate::streaming::MessageQueue;
use log::{debug, error, trace, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Outcome of one dispatcher tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Messages handled this tick
    pub processed: usize,
    /// Messages left in the ingress queue for the next tick
    pub carried_over: usize,
}

pub struct Dispatcher {
    ingress: MessageQueue,
    egress: MessageQueue,
    /// 0 = drain everything
    max_messages_per_tick: usize,
    backlog_warnings: u64,
    total_processed: u64,
}

impl Dispatcher {
    pub fn new(ingress: MessageQueue, egress: MessageQueue, max_messages_per_tick: usize) -> Self {
        Self {
            ingress,
            egress,
            max_messages_per_tick,
            backlog_warnings: 0,
            total_processed: 0,
        }
    }

    /// Total messages handled since creation
    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    /// Process queued commands against the substrate
    pub fn tick(&mut self, substrate: &mut dyn ArticulationSubstrate) -> TickReport {
        let budget = if self.max_messages_per_tick == 0 {
            usize::MAX
        } else {
            self.max_messages_per_tick
        };

        let mut processed = 0;
        while processed < budget {
            let Some(message) = self.ingress.try_pop() else {
                break;
            };
            let reply = handle_message(substrate, &message);
            trace!("Dispatched '{}' -> '{}'", message, reply);
            self.egress.push(reply);
            processed += 1;
        }
        self.total_processed += processed as u64;

        let carried_over = self.ingress.len();
        if carried_over > 0 && processed == budget {
            self.backlog_warnings += 1;
            if self.backlog_warnings % 100 == 1 {
                warn!(
                    "Ingress backlog: {} messages carried over (budget {}/tick, {} occurrences)",
                    carried_over, budget, self.backlog_warnings
                );
            }
        }

        TickReport {
            processed,
            carried_over,
        }
    }
}

/// Execute one message and build its reply
///
/// Never fails: parse errors, substrate errors and substrate panics all
/// become an `ERROR:` reply.
pub fn handle_message(substrate: &mut dyn ArticulationSubstrate, message: &str) -> String {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Command::parse(message).and_then(|cmd| execute(substrate, &cmd))
    }));

    let result = outcome.unwrap_or_else(|payload| {
        let reason = panic_reason(payload.as_ref());
        error!("Substrate panicked while handling '{}': {}", message, reason);
        Err(ProtocolError::Execution(reason))
    });

    match result {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Command '{}' failed: {}", message, e);
            error_reply(&e)
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "substrate panicked".to_string()
    }
}

fn execute(
    substrate: &mut dyn ArticulationSubstrate,
    command: &Command,
) -> Result<String, ProtocolError> {
    let topic = command.topic();
    let reply = match command {
        Command::SetJointForces(deltas) => {
            apply_force_deltas(substrate, deltas)?;
            format!("{}:OK", SET_JOINT_FORCES)
        }
        Command::GetDofStartIndices => {
            format!("{}:{}", topic, format_list(&substrate.dof_start_indices()?))
        }
        Command::GetJointPositions => {
            format!("{}:{}", topic, format_list(&substrate.joint_positions()?))
        }
        Command::GetJointVelocities => {
            format!("{}:{}", topic, format_list(&substrate.joint_velocities()?))
        }
        Command::GetJointForces => {
            format!("{}:{}", topic, format_list(&substrate.joint_forces()?))
        }
        Command::GetJointExternalForces => {
            let window = substrate.fixed_timestep()?;
            let external = substrate.joint_external_forces(window)?;
            format!(
                "{}:{},{}",
                topic,
                external.dof_count,
                format_list(&external.forces)
            )
        }
    };
    Ok(reply)
}

/// Add deltas to the first `min(deltas, dof)` force components
fn apply_force_deltas(
    substrate: &mut dyn ArticulationSubstrate,
    deltas: &[f32],
) -> Result<(), ProtocolError> {
    let mut forces = substrate.joint_forces()?;
    if deltas.len() > forces.len() {
        warn!(
            "{}: {} deltas for {} DOF, ignoring the extra {}",
            SET_JOINT_FORCES,
            deltas.len(),
            forces.len(),
            deltas.len() - forces.len()
        );
    }

    for (force, delta) in forces.iter_mut().zip(deltas) {
        *force += *delta;
    }

    substrate.set_joint_forces(&forces)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExternalForces;
    use crate::error::{Error, Result};
    use crate::sim::SimArticulation;

    /// Substrate whose position read fails and whose velocity read panics
    struct BrokenReads {
        inner: SimArticulation,
    }

    impl ArticulationSubstrate for BrokenReads {
        fn dof_count(&self) -> usize {
            self.inner.dof_count()
        }
        fn joint_positions(&self) -> Result<Vec<f32>> {
            Err(Error::Substrate("position sensors offline".to_string()))
        }
        fn set_joint_positions(&mut self, positions: &[f32]) -> Result<()> {
            self.inner.set_joint_positions(positions)
        }
        fn joint_velocities(&self) -> Result<Vec<f32>> {
            panic!("velocity buffer unavailable")
        }
        fn set_joint_velocities(&mut self, velocities: &[f32]) -> Result<()> {
            self.inner.set_joint_velocities(velocities)
        }
        fn joint_forces(&self) -> Result<Vec<f32>> {
            self.inner.joint_forces()
        }
        fn set_joint_forces(&mut self, forces: &[f32]) -> Result<()> {
            self.inner.set_joint_forces(forces)
        }
        fn joint_external_forces(&self, window: f32) -> Result<ExternalForces> {
            self.inner.joint_external_forces(window)
        }
        fn dof_start_indices(&self) -> Result<Vec<i32>> {
            self.inner.dof_start_indices()
        }
        fn fixed_timestep(&self) -> Result<f32> {
            self.inner.fixed_timestep()
        }
    }

    fn articulation(dof: usize) -> SimArticulation {
        SimArticulation::new(dof, &[], 0.0, 1.0, 0.02).unwrap()
    }

    #[test]
    fn test_set_joint_forces_adds_deltas() {
        let mut sim = articulation(4);
        sim.set_joint_forces(&[1.0, 1.0, 1.0, 1.0]).unwrap();

        let reply = handle_message(&mut sim, "SET_JOINT_FORCES:0.5,-2,3");
        assert_eq!(reply, "SET_JOINT_FORCES:OK");
        assert_eq!(sim.joint_forces().unwrap(), vec![1.5, -1.0, 4.0, 1.0]);
    }

    #[test]
    fn test_set_joint_forces_truncates_extra_deltas() {
        let mut sim = articulation(2);
        let reply = handle_message(&mut sim, "SET_JOINT_FORCES:1,2,3,4");
        assert_eq!(reply, "SET_JOINT_FORCES:OK");
        assert_eq!(sim.joint_forces().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_malformed_forces_do_not_mutate() {
        let mut sim = articulation(3);
        sim.set_joint_forces(&[1.0, 2.0, 3.0]).unwrap();

        for msg in [
            "SET_JOINT_FORCES:1,x,3",
            "SET_JOINT_FORCES:",
            "SET_JOINT_FORCES",
            "SET_JOINT_FORCES:1,NaN",
        ] {
            let reply = handle_message(&mut sim, msg);
            assert!(reply.starts_with("ERROR:"), "{} -> {}", msg, reply);
            assert_eq!(sim.joint_forces().unwrap(), vec![1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn test_unknown_command_reply() {
        let mut sim = articulation(1);
        assert_eq!(
            handle_message(&mut sim, "JUMP:1"),
            "ERROR:Unknown command:JUMP"
        );
        assert_eq!(handle_message(&mut sim, ""), "ERROR:Unknown command:");
    }

    #[test]
    fn test_query_replies() {
        let mut sim = SimArticulation::new(3, &[1, 2], 0.0, 1.0, 0.02).unwrap();
        sim.set_joint_positions(&[0.5, -1.0, 2.25]).unwrap();
        sim.set_joint_velocities(&[1.0, 0.0, -0.5]).unwrap();

        assert_eq!(
            handle_message(&mut sim, "GET_DOF_START_INDICES"),
            "GET_DOF_START_INDICES:0,1"
        );
        assert_eq!(
            handle_message(&mut sim, "GET_JOINT_POSITIONS"),
            "GET_JOINT_POSITIONS:0.5,-1,2.25"
        );
        assert_eq!(
            handle_message(&mut sim, "GET_JOINT_VELOCITIES"),
            "GET_JOINT_VELOCITIES:1,0,-0.5"
        );
        assert_eq!(
            handle_message(&mut sim, "GET_JOINT_FORCES"),
            "GET_JOINT_FORCES:0,0,0"
        );
    }

    #[test]
    fn test_external_forces_reply_has_count_prefix() {
        let mut sim = articulation(2);
        let reply = handle_message(&mut sim, "GET_JOINT_EXTERNAL_FORCES");
        assert_eq!(reply, "GET_JOINT_EXTERNAL_FORCES:2,0,0");
    }

    #[test]
    fn test_error_does_not_affect_following_messages() {
        let ingress = MessageQueue::new();
        let egress = MessageQueue::new();
        let mut dispatcher = Dispatcher::new(ingress.clone(), egress.clone(), 0);
        let mut sim = articulation(2);

        ingress.push("BOGUS".to_string());
        ingress.push("SET_JOINT_FORCES:1,1".to_string());
        ingress.push("GET_JOINT_FORCES".to_string());

        let report = dispatcher.tick(&mut sim);
        assert_eq!(report.processed, 3);
        assert!(ingress.is_empty());
        assert_eq!(egress.try_pop().as_deref(), Some("ERROR:Unknown command:BOGUS"));
        assert_eq!(egress.try_pop().as_deref(), Some("SET_JOINT_FORCES:OK"));
        assert_eq!(egress.try_pop().as_deref(), Some("GET_JOINT_FORCES:1,1"));
    }

    #[test]
    fn test_budget_carries_over() {
        let ingress = MessageQueue::new();
        let egress = MessageQueue::new();
        let mut dispatcher = Dispatcher::new(ingress.clone(), egress.clone(), 2);
        let mut sim = articulation(1);

        for _ in 0..5 {
            ingress.push("SET_JOINT_FORCES:1".to_string());
        }

        assert_eq!(
            dispatcher.tick(&mut sim),
            TickReport {
                processed: 2,
                carried_over: 3
            }
        );
        assert_eq!(dispatcher.tick(&mut sim).carried_over, 1);
        assert_eq!(
            dispatcher.tick(&mut sim),
            TickReport {
                processed: 1,
                carried_over: 0
            }
        );
        assert_eq!(sim.joint_forces().unwrap(), vec![5.0]);
        assert_eq!(egress.len(), 5);
        assert_eq!(dispatcher.total_processed(), 5);
    }

    #[test]
    fn test_empty_tick() {
        let mut dispatcher = Dispatcher::new(MessageQueue::new(), MessageQueue::new(), 16);
        let mut sim = articulation(1);
        assert_eq!(dispatcher.tick(&mut sim), TickReport::default());
    }

    #[test]
    fn test_failing_substrate_only_fails_its_message() {
        let ingress = MessageQueue::new();
        let egress = MessageQueue::new();
        let mut dispatcher = Dispatcher::new(ingress.clone(), egress.clone(), 0);
        let mut broken = BrokenReads {
            inner: articulation(2),
        };

        ingress.push("GET_JOINT_POSITIONS".to_string());
        ingress.push("GET_JOINT_VELOCITIES".to_string());
        ingress.push("GET_JOINT_FORCES".to_string());

        let report = dispatcher.tick(&mut broken);
        assert_eq!(report.processed, 3);
        assert!(ingress.is_empty());
        assert_eq!(
            egress.try_pop().as_deref(),
            Some("ERROR:Substrate error: position sensors offline")
        );
        assert_eq!(
            egress.try_pop().as_deref(),
            Some("ERROR:velocity buffer unavailable")
        );
        assert_eq!(egress.try_pop().as_deref(), Some("GET_JOINT_FORCES:0,0"));
    }
}
