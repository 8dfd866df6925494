//! Publish-role socket
//!
//! Binds a TCP listener that ZeroMQ SUB sockets connect to, and fans every
//! outbound message out as a two-frame message `[topic][TOPIC:payload]`.
//!
//! # Connection Handling
//!
//! - The listener is non-blocking; pending subscribers are accepted before
//!   each send and whenever the publisher worker wakes up
//! - Every subscriber gets a peer thread that runs the ZMTP handshake and
//!   then reads its subscribe/cancel messages
//! - A message goes to subscribers that finished the handshake and hold a
//!   subscription prefixing its topic frame
//! - A subscriber whose write fails is dropped (best-effort delivery, no
//!   retries, no resend of the lost message)
//! - Messages no subscriber wants are discarded

use crate::error::{Error, Result};
use crate::streaming::endpoint::to_bind_address;
use crate::streaming::frame::{Incoming, encode_message, read_incoming};
use crate::streaming::zmtp::{self, SUBSCRIBE, SocketType, UNSUBSCRIBE};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Initial capacity of the reusable send buffer (typical reply size)
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Split a message at its first colon into `(topic, message)`
///
/// A message without a colon is its own topic.
#[inline]
pub fn split_topic(message: &str) -> &str {
    match message.split_once(':') {
        Some((topic, _)) => topic,
        None => message,
    }
}

/// State shared between a subscriber's peer thread and the publisher
#[derive(Default)]
struct PeerState {
    ready: AtomicBool,
    closed: AtomicBool,
    subscriptions: Mutex<Vec<Vec<u8>>>,
}

impl PeerState {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn matches(&self, topic: &[u8]) -> bool {
        self.subscriptions
            .lock()
            .iter()
            .any(|prefix| topic.starts_with(prefix))
    }

    fn subscribe(&self, prefix: Vec<u8>) {
        self.subscriptions.lock().push(prefix);
    }

    /// Cancel drops one matching subscription
    fn cancel(&self, prefix: &[u8]) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(pos) = subscriptions.iter().position(|s| s.as_slice() == prefix) {
            subscriptions.swap_remove(pos);
        }
    }
}

/// A connected subscriber; dropping it closes the connection
struct Subscriber {
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<PeerState>,
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Publisher socket bound to a local address
pub struct PubSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    subscribers: Vec<Subscriber>,
    /// Reusable buffer for frame encoding (avoids allocation per message)
    buffer: Vec<u8>,
}

impl PubSocket {
    /// Bind the publisher to an endpoint (`tcp://*:5555`, `127.0.0.1:5555`, ...)
    pub fn bind(endpoint: &str) -> Result<Self> {
        let address = to_bind_address(endpoint)?;
        let listener = TcpListener::bind(&address).map_err(|source| Error::Bind {
            role: "publisher",
            address: address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!("Publisher socket bound to {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            subscribers: Vec::new(),
            buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected subscribers, including ones still in the handshake
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether any ready subscriber would receive a message on `topic`
    pub fn has_subscriber_for(&self, topic: &str) -> bool {
        self.subscribers
            .iter()
            .any(|sub| sub.state.is_ready() && sub.state.matches(topic.as_bytes()))
    }

    /// Accept every subscriber waiting in the listen backlog
    ///
    /// Returns an error only when the listener itself is broken.
    pub fn accept_pending(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.add_subscriber(stream, addr),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(ref e)
                    if e.kind() == ErrorKind::ConnectionAborted
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    // Peer went away before we accepted it
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn add_subscriber(&mut self, stream: TcpStream, addr: SocketAddr) {
        // Subscriber streams are written in blocking mode
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("Failed to set blocking mode for subscriber {}: {}", addr, e);
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Failed to clone subscriber stream {}: {}", addr, e);
                return;
            }
        };

        let state = Arc::new(PeerState::default());
        let peer_state = Arc::clone(&state);
        let spawned = thread::Builder::new()
            .name("relay-pub-peer".to_string())
            .spawn(move || serve_subscriber(reader, addr, peer_state));
        if let Err(e) = spawned {
            warn!("Failed to spawn peer thread for subscriber {}: {}", addr, e);
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        info!("Subscriber connected: {}", addr);
        self.subscribers.push(Subscriber {
            stream,
            addr,
            state,
        });
    }

    /// Publish one message to all matching subscribers
    ///
    /// Returns how many subscribers the message was written to.
    pub fn send(&mut self, message: &str) -> Result<usize> {
        let topic = split_topic(message).as_bytes();

        self.subscribers.retain(|sub| {
            let closed = sub.state.closed.load(Ordering::Acquire);
            if closed {
                info!("Subscriber disconnected: {}", sub.addr);
            }
            !closed
        });

        let wanted = |sub: &Subscriber| sub.state.is_ready() && sub.state.matches(topic);
        if !self.subscribers.iter().any(wanted) {
            trace!("No subscriber for {}, dropping", split_topic(message));
            return Ok(0);
        }

        // Encode once, write the same bytes to every subscriber
        let parts: [&[u8]; 2] = [topic, message.as_bytes()];
        encode_message(&parts, &mut self.buffer)?;
        let bytes = &self.buffer;
        let mut delivered = 0;

        // Send to matching subscribers, removing disconnected ones
        self.subscribers.retain_mut(|sub| {
            if !wanted(sub) {
                return true;
            }
            match sub.stream.write_all(bytes) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    debug!("Subscriber {} disconnected: {}", sub.addr, e);
                    false
                }
            }
        });

        Ok(delivered)
    }

    /// Close the listener and every subscriber connection
    pub fn close(self) {
        info!(
            "Publisher socket on {} closed ({} subscribers dropped)",
            self.local_addr,
            self.subscribers.len()
        );
    }
}

/// Peer thread: handshake, then track subscribe/cancel requests until EOF
fn serve_subscriber(mut stream: TcpStream, addr: SocketAddr, state: Arc<PeerState>) {
    match zmtp::handshake(&mut stream, SocketType::Pub) {
        Ok(peer) => {
            debug!("Subscriber {} ready ({})", addr, peer.as_str());
            state.ready.store(true, Ordering::Release);
        }
        Err(e) => {
            warn!("Subscriber {} failed the handshake: {}", addr, e);
            state.closed.store(true, Ordering::Release);
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }

    loop {
        match read_incoming(&mut stream) {
            Ok(Some(Incoming::Message(parts))) => match parts.first().map(Vec::as_slice) {
                Some([SUBSCRIBE, prefix @ ..]) => state.subscribe(prefix.to_vec()),
                Some([UNSUBSCRIBE, prefix @ ..]) => state.cancel(prefix),
                _ => trace!("Ignoring message from subscriber {}", addr),
            },
            Ok(Some(Incoming::Command { name, data })) => match name.as_str() {
                "SUBSCRIBE" => state.subscribe(data),
                "CANCEL" => state.cancel(&data),
                other => trace!("Ignoring {} command from subscriber {}", other, addr),
            },
            Ok(None) => {
                debug!("Subscriber {} closed its connection", addr);
                break;
            }
            Err(e) => {
                debug!("Subscriber {} connection ended: {}", addr, e);
                break;
            }
        }
    }
    state.closed.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::frame::{read_message, write_message};
    use crate::streaming::zmtp::subscription_message;
    use std::time::Duration;

    /// Connect as a ZMTP SUB and subscribe to `prefix`
    fn subscribe(addr: SocketAddr, prefix: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).unwrap();
        zmtp::handshake(&mut stream, SocketType::Sub).unwrap();
        let mut buf = Vec::new();
        let body = subscription_message(true, prefix.as_bytes());
        write_message(&mut stream, &[body.as_slice()], &mut buf).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn wait_for_subscriber(socket: &mut PubSocket, topic: &str) {
        for _ in 0..400 {
            socket.accept_pending().unwrap();
            if socket.has_subscriber_for(topic) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no subscriber for {}", topic);
    }

    #[test]
    fn test_split_topic() {
        assert_eq!(split_topic("GET_JOINT_FORCES:1,2"), "GET_JOINT_FORCES");
        assert_eq!(split_topic("ERROR:Unknown command:FOO"), "ERROR");
        assert_eq!(split_topic("GET_DOF_START_INDICES"), "GET_DOF_START_INDICES");
        assert_eq!(split_topic(":x"), "");
    }

    #[test]
    fn test_send_without_subscribers() {
        let mut socket = PubSocket::bind("127.0.0.1:0").unwrap();
        assert_eq!(socket.send("SET_JOINT_FORCES:OK").unwrap(), 0);
        socket.close();
    }

    #[test]
    fn test_broadcast_two_frames() {
        let mut socket = PubSocket::bind("127.0.0.1:0").unwrap();
        let mut client = subscribe(socket.local_addr(), "");
        wait_for_subscriber(&mut socket, "GET_JOINT_POSITIONS");

        assert_eq!(socket.send("GET_JOINT_POSITIONS:0.5,1").unwrap(), 1);

        let parts = read_message(&mut client).unwrap().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"GET_JOINT_POSITIONS");
        assert_eq!(parts[1], b"GET_JOINT_POSITIONS:0.5,1");
    }

    #[test]
    fn test_subscriber_prefix_filter() {
        let mut socket = PubSocket::bind("127.0.0.1:0").unwrap();
        let mut client = subscribe(socket.local_addr(), "GET_");
        wait_for_subscriber(&mut socket, "GET_JOINT_FORCES");

        assert_eq!(socket.send("SET_JOINT_FORCES:OK").unwrap(), 0);
        assert_eq!(socket.send("GET_JOINT_FORCES:1,2").unwrap(), 1);

        // The filtered message never reached the wire
        let parts = read_message(&mut client).unwrap().unwrap();
        assert_eq!(parts[1], b"GET_JOINT_FORCES:1,2");
    }

    #[test]
    fn test_non_zmtp_peer_dropped() {
        let mut socket = PubSocket::bind("127.0.0.1:0").unwrap();
        let mut raw = TcpStream::connect(socket.local_addr()).unwrap();
        raw.write_all(&[b'G'; 64]).unwrap();

        let mut accepted = false;
        let mut dropped = false;
        for _ in 0..400 {
            socket.accept_pending().unwrap();
            accepted |= socket.subscriber_count() == 1;
            assert_eq!(socket.send("GET_JOINT_FORCES:1").unwrap(), 0);
            if accepted && socket.subscriber_count() == 0 {
                dropped = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(dropped);
    }

    #[test]
    fn test_second_bind_fails() {
        let first = PubSocket::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();

        let err = PubSocket::bind(&addr).err().unwrap();
        assert!(matches!(err, Error::Bind { role: "publisher", .. }));

        // First socket is unaffected
        assert_eq!(first.local_addr().to_string(), addr);
    }
}
