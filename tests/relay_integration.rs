//! End-to-end relay tests over loopback TCP
//!
//! A small test controller plays the external process: it publishes commands
//! into the relay's subscriber socket and subscribes to the relay's
//! publisher socket for replies.

use setu_io::Error;
use setu_io::config::TransportConfig;
use setu_io::motion::{Setpoint, SetpointCache};
use setu_io::protocol::Dispatcher;
use setu_io::sim::SimArticulation;
use setu_io::streaming::frame::{read_message, write_message};
use setu_io::streaming::zmtp::{self, SUBSCRIBE, SocketType};
use setu_io::streaming::{MessageQueue, Relay};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestController {
    commands: TcpStream,
    replies: TcpStream,
    buffer: Vec<u8>,
}

impl TestController {
    fn connect(relay: &Relay) -> Self {
        let commands = connect_publisher(relay.subscriber_addr());

        // Subscribe to every reply topic
        let mut replies = TcpStream::connect(relay.publisher_addr()).unwrap();
        assert_eq!(
            zmtp::handshake(&mut replies, SocketType::Sub).unwrap(),
            SocketType::Pub
        );
        let mut buffer = Vec::new();
        let subscribe_all = zmtp::subscription_message(true, b"");
        write_message(&mut replies, &[subscribe_all.as_slice()], &mut buffer).unwrap();
        replies.set_read_timeout(Some(TIMEOUT)).unwrap();

        // Give the publisher time to register the subscription
        thread::sleep(Duration::from_millis(100));

        Self {
            commands,
            replies,
            buffer,
        }
    }

    fn send(&mut self, message: &str) {
        write_message(&mut self.commands, &[message.as_bytes()], &mut self.buffer).unwrap();
    }

    /// Next reply as `(topic frame, message frame)`
    fn recv(&mut self) -> (String, String) {
        let parts = read_message(&mut self.replies).unwrap().unwrap();
        assert_eq!(parts.len(), 2);
        (
            String::from_utf8(parts[0].clone()).unwrap(),
            String::from_utf8(parts[1].clone()).unwrap(),
        )
    }
}

/// Connect to the relay's subscriber as a ZMTP publisher
///
/// Returns once the relay has sent its first subscription.
fn connect_publisher(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    assert_eq!(
        zmtp::handshake(&mut stream, SocketType::Pub).unwrap(),
        SocketType::Sub
    );
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let subscription = read_message(&mut stream).unwrap().unwrap();
    assert_eq!(subscription[0].first(), Some(&SUBSCRIBE));
    stream
}

fn loopback() -> TransportConfig {
    TransportConfig {
        publisher_address: "127.0.0.1:0".to_string(),
        subscriber_address: "127.0.0.1:0".to_string(),
        join_timeout_ms: 2000,
        ..TransportConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Tick the dispatcher until the expected number of messages was handled
fn tick_until(
    dispatcher: &mut Dispatcher,
    sim: &mut SimArticulation,
    ingress: &MessageQueue,
    count: usize,
) {
    let mut handled = 0;
    assert!(wait_until(|| {
        if !ingress.is_empty() {
            handled += dispatcher.tick(&mut *sim).processed;
        }
        handled >= count
    }));
}

#[test]
fn command_reply_round_trip() {
    let ingress = MessageQueue::new();
    let egress = MessageQueue::new();
    let mut relay = Relay::start(&loopback(), ingress.clone(), egress.clone(), None).unwrap();
    let mut dispatcher = Dispatcher::new(ingress.clone(), egress.clone(), 0);
    let mut sim = SimArticulation::new(3, &[], 0.0, 1.0, 0.02).unwrap();
    let mut controller = TestController::connect(&relay);

    controller.send("SET_JOINT_FORCES:1.5,-2");
    tick_until(&mut dispatcher, &mut sim, &ingress, 1);
    assert_eq!(
        controller.recv(),
        (
            "SET_JOINT_FORCES".to_string(),
            "SET_JOINT_FORCES:OK".to_string()
        )
    );

    controller.send("GET_JOINT_FORCES");
    tick_until(&mut dispatcher, &mut sim, &ingress, 1);
    assert_eq!(controller.recv().1, "GET_JOINT_FORCES:1.5,-2,0");

    controller.send("NOPE:1,2");
    tick_until(&mut dispatcher, &mut sim, &ingress, 1);
    assert_eq!(
        controller.recv(),
        (
            "ERROR".to_string(),
            "ERROR:Unknown command:NOPE".to_string()
        )
    );

    relay.teardown();
}

#[test]
fn setpoints_bypass_ingress_queue() {
    let ingress = MessageQueue::new();
    let cache = Arc::new(SetpointCache::uniform(2, Setpoint::default()));
    let mut relay = Relay::start(
        &loopback(),
        ingress.clone(),
        MessageQueue::new(),
        Some(Arc::clone(&cache)),
    )
    .unwrap();
    let mut controller = TestController::connect(&relay);

    controller.send("SET_MOTOR_PARAMS:1,2.0,0.5,0.1,3.5");
    controller.send(r#"{"motor_id":0,"P":0.3,"I":0.0,"D":0.0,"target":-1.0}"#);
    // Out-of-range joint is dropped without a reply
    controller.send("SET_MOTOR_PARAMS:7,1,1,1,1");
    controller.send("GET_JOINT_POSITIONS");

    assert!(wait_until(|| ingress.len() == 1));
    assert_eq!(cache.update_count(), 2);
    assert_eq!(ingress.try_pop().as_deref(), Some("GET_JOINT_POSITIONS"));

    let joint1 = cache.load(1).unwrap();
    assert_eq!(joint1.gains.p, 2.0);
    assert_eq!(joint1.target, 3.5);
    assert_eq!(cache.load(0).unwrap().target, -1.0);

    relay.teardown();
}

#[test]
fn subscription_filter_discards_other_topics() {
    let ingress = MessageQueue::new();
    let config = TransportConfig {
        subscriptions: vec!["GET_".to_string()],
        ..loopback()
    };
    let mut relay = Relay::start(&config, ingress.clone(), MessageQueue::new(), None).unwrap();
    let mut controller = TestController::connect(&relay);

    controller.send("SET_JOINT_FORCES:1");
    controller.send("GET_JOINT_VELOCITIES");

    assert!(wait_until(|| !ingress.is_empty()));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ingress.len(), 1);
    assert_eq!(ingress.try_pop().as_deref(), Some("GET_JOINT_VELOCITIES"));

    relay.teardown();
}

#[test]
fn second_publisher_bind_fails_without_affecting_first() {
    let ingress = MessageQueue::new();
    let egress = MessageQueue::new();
    let mut first = Relay::start(&loopback(), ingress.clone(), egress.clone(), None).unwrap();

    let clash = TransportConfig {
        publisher_address: first.publisher_addr().to_string(),
        ..loopback()
    };
    let err = Relay::start(&clash, MessageQueue::new(), MessageQueue::new(), None)
        .err()
        .unwrap();
    assert!(matches!(err, Error::Bind { role: "publisher", .. }));

    // First relay still serves a full round trip
    assert!(first.health().is_healthy());
    let mut dispatcher = Dispatcher::new(ingress.clone(), egress.clone(), 0);
    let mut sim = SimArticulation::new(2, &[1, 1], 0.0, 1.0, 0.02).unwrap();
    let mut controller = TestController::connect(&first);

    controller.send("GET_DOF_START_INDICES");
    tick_until(&mut dispatcher, &mut sim, &ingress, 1);
    assert_eq!(controller.recv().1, "GET_DOF_START_INDICES:0,1");

    first.teardown();
}

#[test]
fn teardown_is_idempotent_and_stops_traffic() {
    let ingress = MessageQueue::new();
    let egress = MessageQueue::new();
    let mut relay = Relay::start(&loopback(), ingress.clone(), egress.clone(), None).unwrap();
    let subscriber_addr: SocketAddr = relay.subscriber_addr();
    let mut controller = TestController::connect(&relay);

    let started = Instant::now();
    relay.teardown();
    relay.teardown();
    assert!(started.elapsed() < TIMEOUT);
    assert!(!relay.is_running());
    assert!(!relay.health().publisher_alive);
    assert!(!relay.health().subscriber_alive);

    // Nothing is published after stop
    egress.push("GET_JOINT_FORCES:1,2".to_string());
    assert!(!matches!(read_message(&mut controller.replies), Ok(Some(_))));

    // Nothing is received after stop
    if let Ok(mut late) = TcpStream::connect_timeout(&subscriber_addr, Duration::from_millis(200)) {
        let mut buffer = Vec::new();
        let _ = write_message(&mut late, &[b"GET_JOINT_POSITIONS".as_slice()], &mut buffer);
    }
    thread::sleep(Duration::from_millis(50));
    assert!(ingress.is_empty());

    drop(relay);
}

#[test]
fn idle_controller_does_not_hold_up_others() {
    let ingress = MessageQueue::new();
    let mut relay = Relay::start(&loopback(), ingress.clone(), MessageQueue::new(), None).unwrap();

    // First controller stalls halfway through a frame
    let mut stalled = connect_publisher(relay.subscriber_addr());
    stalled.write_all(&[0x00, 19]).unwrap();
    stalled.write_all(b"GET_JOINT").unwrap();
    stalled.flush().unwrap();

    let mut active = TestController::connect(&relay);
    active.send("GET_JOINT_FORCES");
    assert!(wait_until(|| ingress.len() == 1));
    assert_eq!(ingress.try_pop().as_deref(), Some("GET_JOINT_FORCES"));

    // The stalled frame still completes later
    stalled.write_all(b"_POSITIONS").unwrap();
    stalled.flush().unwrap();
    assert!(wait_until(|| ingress.len() == 1));
    assert_eq!(ingress.try_pop().as_deref(), Some("GET_JOINT_POSITIONS"));
    assert!(relay.health().is_healthy());

    relay.teardown();
}

#[test]
fn controller_can_reconnect() {
    let ingress = MessageQueue::new();
    let mut relay = Relay::start(&loopback(), ingress.clone(), MessageQueue::new(), None).unwrap();

    {
        let mut first = TestController::connect(&relay);
        first.send("GET_JOINT_POSITIONS");
        assert!(wait_until(|| ingress.len() == 1));
    }

    let mut second = TestController::connect(&relay);
    second.send("GET_JOINT_VELOCITIES");
    assert!(wait_until(|| ingress.len() == 2));
    assert!(relay.health().is_healthy());

    relay.teardown();
}
