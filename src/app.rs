//! Application orchestration for SetuIO
//!
//! Wires the relay, the dispatcher and the actuators around a simulated
//! articulation and runs them on a fixed step:
//!
//! ```text
//! every fixed_timestep:
//! 1. Read each actuator's setpoint from the cache and step its joint
//! 2. Run one dispatcher tick (ingress -> substrate -> egress)
//! 3. Integrate the articulation
//! 4. Check relay worker liveness
//! 5. Sleep for the rest of the step
//! ```
//!
//! A relay that fails to start is logged and the loop runs without
//! transport.

use crate::config::Config;
use crate::core::substrate::{ArticulationSubstrate, JointBody};
use crate::error::Result;
use crate::motion::{JointActuator, SetpointCache};
use crate::protocol::{Dispatcher, TickReport};
use crate::sim::{SimArticulation, SimJoint};
use crate::streaming::{MessageQueue, Relay, RelayHealth};
use log::{debug, error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between statistics log lines
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// An actuator together with the body it drives
struct ActuatedJoint {
    actuator: JointActuator,
    body: SimJoint,
}

/// Main application structure
pub struct BridgeApp {
    articulation: SimArticulation,
    joints: Vec<ActuatedJoint>,
    setpoints: Arc<SetpointCache>,
    dispatcher: Dispatcher,
    ingress: MessageQueue,
    egress: MessageQueue,
    relay: Option<Relay>,
    shutdown: Arc<AtomicBool>,
    ticks: u64,
    publisher_fault_logged: bool,
    subscriber_fault_logged: bool,
}

impl BridgeApp {
    /// Build the app and start the relay
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, true)
    }

    /// Build the app without any transport
    pub fn offline(config: Config) -> Result<Self> {
        Self::build(config, false)
    }

    fn build(config: Config, start_transport: bool) -> Result<Self> {
        config.validate()?;
        info!("Initializing SetuIO application");

        let sim = &config.simulation;
        let articulation = SimArticulation::new(
            sim.dof_count,
            &sim.links,
            sim.damping,
            sim.joint_inertia,
            sim.fixed_timestep,
        )?;

        // Only actuated joints accept setpoints
        let mut initial = vec![None; sim.dof_count];
        let mut joints = Vec::with_capacity(config.actuators.len());
        for actuator_config in &config.actuators {
            initial[actuator_config.id] = Some(actuator_config.setpoint());

            let actuator = JointActuator::new(
                actuator_config.id,
                actuator_config.servo,
                actuator_config.axis.into(),
            )?;
            let mut body = SimJoint::default();
            actuator.attach(&mut body);
            joints.push(ActuatedJoint { actuator, body });
        }
        let setpoints = Arc::new(SetpointCache::new(initial));

        let ingress = MessageQueue::new();
        let egress = MessageQueue::new();
        let dispatcher = Dispatcher::new(
            ingress.clone(),
            egress.clone(),
            config.dispatcher.max_messages_per_tick,
        );

        let relay = if start_transport {
            match Relay::start(
                &config.transport,
                ingress.clone(),
                egress.clone(),
                Some(Arc::clone(&setpoints)),
            ) {
                Ok(relay) => Some(relay),
                Err(e) => {
                    error!("Transport disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "✓ {} DOF articulation, {} actuators, fixed step {}s",
            sim.dof_count,
            joints.len(),
            sim.fixed_timestep
        );

        Ok(Self {
            articulation,
            joints,
            setpoints,
            dispatcher,
            ingress,
            egress,
            relay,
            shutdown: Arc::new(AtomicBool::new(false)),
            ticks: 0,
            publisher_fault_logged: false,
            subscriber_fault_logged: false,
        })
    }

    pub fn articulation(&self) -> &SimArticulation {
        &self.articulation
    }

    pub fn setpoints(&self) -> Arc<SetpointCache> {
        Arc::clone(&self.setpoints)
    }

    pub fn ingress(&self) -> &MessageQueue {
        &self.ingress
    }

    pub fn egress(&self) -> &MessageQueue {
        &self.egress
    }

    pub fn relay(&self) -> Option<&Relay> {
        self.relay.as_ref()
    }

    /// Completed fixed steps
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Flag that stops [`BridgeApp::run`] when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run one fixed step
    pub fn step_once(&mut self) -> Result<TickReport> {
        let dt = self.articulation.fixed_timestep()?;

        let mut velocities = self.articulation.joint_velocities()?;
        for joint in &mut self.joints {
            let id = joint.actuator.joint_id();
            let setpoint = self.setpoints.load(id).unwrap_or_default();
            let axis = joint.actuator.axis();

            joint.body.set_angular_velocity(axis * velocities[id]);
            joint.actuator.step(&setpoint, &mut joint.body, dt)?;
            joint.body.integrate(dt);
            velocities[id] = joint.body.angular_velocity().dot(axis);
        }
        self.articulation.set_joint_velocities(&velocities)?;

        let report = self.dispatcher.tick(&mut self.articulation);
        self.articulation.step();
        self.check_transport_health();

        self.ticks += 1;
        Ok(report)
    }

    /// Run the fixed-step loop until a signal arrives or `duration` passes
    pub fn run(&mut self, duration: Option<Duration>) -> Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.shutdown))?;
        }

        let step = Duration::from_secs_f32(self.articulation.fixed_timestep()?);
        let started = Instant::now();
        let mut last_stats = Instant::now();

        if let Some(relay) = &self.relay {
            info!("Publishing on: {}", relay.publisher_addr());
            info!("Receiving on: {}", relay.subscriber_addr());
        }
        info!("Press Ctrl+C to stop");

        while !self.shutdown.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            self.step_once()?;

            if let Some(limit) = duration
                && started.elapsed() >= limit
            {
                info!("Run duration of {:?} reached", limit);
                break;
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                self.log_statistics();
                last_stats = Instant::now();
            }

            if let Some(rest) = step.checked_sub(tick_start.elapsed()) {
                thread::sleep(rest);
            }
        }

        info!("Stopping after {} ticks", self.ticks);
        self.stop();
        Ok(())
    }

    /// Tear down the transport; idempotent
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(relay) = self.relay.as_mut() {
            relay.teardown();
        }
    }

    /// Log each dead worker once; workers are not restarted
    fn check_transport_health(&mut self) {
        let Some(relay) = &self.relay else {
            return;
        };
        if !relay.is_running() {
            return;
        }
        let health = relay.health();
        self.record_health(health);
    }

    /// Record worker liveness; returns how many faults were newly logged
    fn record_health(&mut self, health: RelayHealth) -> usize {
        let mut logged = 0;
        if !health.publisher_alive && !self.publisher_fault_logged {
            error!("Relay publisher worker has stopped; replies are no longer sent");
            self.publisher_fault_logged = true;
            logged += 1;
        }
        if !health.subscriber_alive && !self.subscriber_fault_logged {
            error!("Relay subscriber worker has stopped; commands are no longer received");
            self.subscriber_fault_logged = true;
            logged += 1;
        }
        logged
    }

    fn log_statistics(&self) {
        info!(
            "Ticks={} Dispatched={} Ingress={} Egress={} Setpoint updates={}",
            self.ticks,
            self.dispatcher.total_processed(),
            self.ingress.len(),
            self.egress.len(),
            self.setpoints.update_count()
        );
        if let Some(relay) = &self.relay {
            debug!("Relay health: {:?}", relay.health());
        }
    }
}

impl Drop for BridgeApp {
    fn drop(&mut self) {
        debug!("BridgeApp cleaning up...");
        self.stop();
    }
}
