//! Message relay between the external controller and the tick thread
//!
//! Owns the two transport sockets, each driven by its own worker thread:
//!
//! ```text
//!              ┌──────────────────┐   ingress    ┌────────────┐
//! controller ─▶│ relay-subscriber │─────────────▶│            │
//!              └────────┬─────────┘              │ dispatcher │
//!                       │ setpoints              │   (tick)   │
//!                       ▼                        │            │
//!               SetpointCache (actuators)        │            │
//!              ┌──────────────────┐   egress     │            │
//! controller ◀─│ relay-publisher  │◀─────────────│            │
//!              └──────────────────┘              └────────────┘
//! ```
//!
//! # Lifecycle
//!
//! - [`Relay::start`] binds the publisher first, then the subscriber. Either
//!   failure aborts startup and releases whatever was already bound.
//! - Both workers poll one shared running flag.
//! - [`Relay::teardown`] clears the flag, unblocks the subscriber and joins
//!   both workers against a deadline. A worker still running at the deadline
//!   is abandoned. Teardown runs once; later calls (and `Drop`) are no-ops.
//! - A worker that hits a fatal socket error exits on its own. Nothing
//!   restarts it; [`Relay::health`] reports which workers are still alive.
//! - Any number of controllers may be connected to the subscriber at once.

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::motion::setpoint::{SetpointCache, parse_setpoint};
use crate::streaming::pub_socket::PubSocket;
use crate::streaming::queue::MessageQueue;
use crate::streaming::sub_socket::{SubInterrupter, SubSocket};
use log::{debug, error, info, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Interval between `is_finished` checks while joining workers
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Liveness of the two relay workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHealth {
    pub publisher_alive: bool,
    pub subscriber_alive: bool,
}

impl RelayHealth {
    pub fn is_healthy(&self) -> bool {
        self.publisher_alive && self.subscriber_alive
    }
}

/// Clears a worker's alive flag when the worker exits, including by panic
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Running transport component
pub struct Relay {
    running: Arc<AtomicBool>,
    publisher_alive: Arc<AtomicBool>,
    subscriber_alive: Arc<AtomicBool>,
    publisher_thread: Option<JoinHandle<()>>,
    subscriber_thread: Option<JoinHandle<()>>,
    interrupter: SubInterrupter,
    publisher_addr: SocketAddr,
    subscriber_addr: SocketAddr,
    join_timeout: Duration,
    torn_down: bool,
}

impl Relay {
    /// Bind both sockets and start the workers
    ///
    /// Inbound messages go to `ingress`; replies are taken from `egress`.
    /// When `setpoints` is given, setpoint messages are written straight into
    /// the cache instead of being queued.
    pub fn start(
        config: &TransportConfig,
        ingress: MessageQueue,
        egress: MessageQueue,
        setpoints: Option<Arc<SetpointCache>>,
    ) -> Result<Self> {
        let publisher = PubSocket::bind(&config.publisher_address)?;
        let subscriber = match SubSocket::bind(&config.subscriber_address, &config.subscriptions) {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Releasing publisher socket after subscriber bind failure");
                publisher.close();
                return Err(e);
            }
        };

        let publisher_addr = publisher.local_addr();
        let subscriber_addr = subscriber.local_addr();
        let interrupter = subscriber.interrupter();
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));

        let running = Arc::new(AtomicBool::new(true));
        let publisher_alive = Arc::new(AtomicBool::new(true));
        let subscriber_alive = Arc::new(AtomicBool::new(true));

        let publisher_thread = {
            let running = Arc::clone(&running);
            spawn_worker("relay-publisher", &publisher_alive, move || {
                publisher_loop(publisher, egress, &running, poll_interval);
            })?
        };

        let subscriber_thread = {
            let running = Arc::clone(&running);
            spawn_worker("relay-subscriber", &subscriber_alive, move || {
                subscriber_loop(subscriber, ingress, setpoints, &running, poll_interval);
            })
        };
        let subscriber_thread = match subscriber_thread {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                let _ = publisher_thread.join();
                return Err(e);
            }
        };

        info!(
            "Relay started (publisher {}, subscriber {})",
            publisher_addr, subscriber_addr
        );

        Ok(Self {
            running,
            publisher_alive,
            subscriber_alive,
            publisher_thread: Some(publisher_thread),
            subscriber_thread: Some(subscriber_thread),
            interrupter,
            publisher_addr,
            subscriber_addr,
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            torn_down: false,
        })
    }

    /// Address the publisher is bound to
    pub fn publisher_addr(&self) -> SocketAddr {
        self.publisher_addr
    }

    /// Address the subscriber is bound to
    pub fn subscriber_addr(&self) -> SocketAddr {
        self.subscriber_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn health(&self) -> RelayHealth {
        RelayHealth {
            publisher_alive: self.publisher_alive.load(Ordering::Acquire),
            subscriber_alive: self.subscriber_alive.load(Ordering::Acquire),
        }
    }

    /// Stop both workers and release the sockets
    ///
    /// Safe to call any number of times.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        info!("Relay teardown requested");
        self.running.store(false, Ordering::Release);
        self.interrupter.interrupt();

        let deadline = Instant::now() + self.join_timeout;
        if let Some(handle) = self.publisher_thread.take() {
            join_until("relay-publisher", handle, deadline);
        }
        if let Some(handle) = self.subscriber_thread.take() {
            join_until("relay-subscriber", handle, deadline);
        }
        info!("Relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Spawn a named worker whose alive flag clears when it exits for any reason
fn spawn_worker<F>(name: &str, alive: &Arc<AtomicBool>, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let guard = AliveGuard(Arc::clone(alive));
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard = guard;
            body();
        })
        .map_err(|e| Error::ThreadSpawn(format!("{}: {}", name, e)))
}

/// Join a worker, abandoning it if it is still running at `deadline`
fn join_until(name: &str, handle: JoinHandle<()>, deadline: Instant) {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{} did not stop before the join timeout, abandoning it", name);
            return;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        error!("{} panicked", name);
    }
}

/// Log a fatal worker error; after stop such errors are expected noise
fn report_worker_error(name: &str, running: &AtomicBool, e: &Error) {
    if running.load(Ordering::Acquire) {
        error!("{} failed: {}", name, e);
    } else {
        debug!("{} error during shutdown: {}", name, e);
    }
}

fn publisher_loop(
    mut socket: PubSocket,
    egress: MessageQueue,
    running: &AtomicBool,
    poll_interval: Duration,
) {
    info!("Publisher worker started");
    let mut published = 0u64;

    while running.load(Ordering::Acquire) {
        if let Err(e) = socket.accept_pending() {
            report_worker_error("relay-publisher", running, &e);
            break;
        }

        // Blocks until a reply arrives or the poll interval passes
        let Some(message) = egress.pop_timeout(poll_interval) else {
            continue;
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        match socket.send(&message) {
            Ok(delivered) => {
                published += 1;
                trace!("Published '{}' to {} subscribers", message, delivered);
            }
            Err(Error::Frame(reason)) => {
                warn!("Dropping unsendable message: {}", reason);
            }
            Err(e) => {
                report_worker_error("relay-publisher", running, &e);
                break;
            }
        }
    }

    socket.close();
    info!("Publisher worker exiting ({} messages published)", published);
}

fn subscriber_loop(
    mut socket: SubSocket,
    ingress: MessageQueue,
    setpoints: Option<Arc<SetpointCache>>,
    running: &AtomicBool,
    poll_interval: Duration,
) {
    info!("Subscriber worker started");
    let mut received = 0u64;

    loop {
        match socket.recv(running, poll_interval) {
            Ok(Some(message)) => {
                received += 1;
                route_inbound(message, &ingress, setpoints.as_deref());
            }
            Ok(None) => break,
            Err(e) => {
                report_worker_error("relay-subscriber", running, &e);
                break;
            }
        }
    }

    socket.close();
    info!("Subscriber worker exiting ({} messages received)", received);
}

/// Send setpoints to the cache and everything else to the dispatcher
fn route_inbound(message: String, ingress: &MessageQueue, setpoints: Option<&SetpointCache>) {
    if let Some(cache) = setpoints
        && let Some(parsed) = parse_setpoint(&message)
    {
        match parsed.map_err(|e| e.to_string()).and_then(|update| {
            cache.apply(&update).map_err(|e| e.to_string())?;
            Ok(update)
        }) {
            Ok(update) => debug!(
                "Setpoint for joint {}: {:?}",
                update.joint_id, update.setpoint
            ),
            Err(e) => warn!("Dropping setpoint '{}': {}", message, e),
        }
        return;
    }

    trace!("Queued '{}'", message);
    ingress.push(message);
}
