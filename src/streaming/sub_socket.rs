//! Subscribe-role socket
//!
//! Binds a TCP listener that external controllers (ZeroMQ PUB sockets)
//! connect to and publish into. Any number of controllers may be connected
//! at the same time.
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. Controller connects; SubSocket::recv accepts it from the listener
//! 2. A controller thread runs the ZMTP handshake and sends our subscriptions
//! 3. The thread reads messages until the controller disconnects, handing
//!    each one to SubSocket::recv through an inbox channel
//! ```
//!
//! Messages from one controller keep their order. Messages from different
//! controllers interleave, and an idle controller never holds up another.
//!
//! # Subscriptions
//!
//! The topic prefixes are sent to every controller as subscribe messages, so
//! the controller filters at the source, and are applied again on receive.
//! Filtering looks at the first frame. The empty prefix matches everything.
//!
//! # Shutdown
//!
//! A [`SubInterrupter`] wakes a pending receive from another thread and
//! closes every controller connection.

use crate::error::{Error, Result};
use crate::streaming::endpoint::to_bind_address;
use crate::streaming::frame::{read_message, write_message};
use crate::streaming::zmtp::{self, SocketType, subscription_message};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Open controller connections by id, shared with the interrupter
type ControllerMap = Arc<Mutex<HashMap<u64, TcpStream>>>;

enum Inbound {
    Message(String),
    /// Sent by the interrupter to end a pending wait
    Wake,
}

/// Subscriber socket bound to a local address
pub struct SubSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    subscriptions: Arc<[String]>,
    inbox: Receiver<Inbound>,
    inbox_tx: Sender<Inbound>,
    controllers: ControllerMap,
    next_controller_id: u64,
}

impl SubSocket {
    /// Bind the subscriber to an endpoint and subscribe to topic prefixes
    ///
    /// An empty `subscriptions` list subscribes to everything.
    pub fn bind(endpoint: &str, subscriptions: &[String]) -> Result<Self> {
        let address = to_bind_address(endpoint)?;
        let listener = TcpListener::bind(&address).map_err(|source| Error::Bind {
            role: "subscriber",
            address: address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let subscriptions: Arc<[String]> = if subscriptions.is_empty() {
            Arc::from(vec![String::new()])
        } else {
            Arc::from(subscriptions.to_vec())
        };

        info!(
            "Subscriber socket bound to {} (subscriptions: {:?})",
            local_addr, subscriptions
        );

        let (inbox_tx, inbox) = unbounded();
        Ok(Self {
            listener,
            local_addr,
            subscriptions,
            inbox,
            inbox_tx,
            controllers: Arc::new(Mutex::new(HashMap::new())),
            next_controller_id: 0,
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open controller connections
    pub fn controller_count(&self) -> usize {
        self.controllers.lock().len()
    }

    /// Handle that can unblock [`SubSocket::recv`] from another thread
    pub fn interrupter(&self) -> SubInterrupter {
        SubInterrupter {
            inbox: self.inbox_tx.clone(),
            controllers: Arc::clone(&self.controllers),
        }
    }

    /// Check whether a topic frame matches any subscription prefix
    pub fn is_subscribed(&self, topic: &[u8]) -> bool {
        is_subscribed(&self.subscriptions, topic)
    }

    /// Block until the next subscribed text message arrives
    ///
    /// New controllers are accepted at least every `poll_interval`. Returns
    /// `Ok(None)` once `running` is cleared. Controller disconnects and
    /// malformed messages are handled by the controller threads; only a
    /// broken listener is reported as an error.
    pub fn recv(
        &mut self,
        running: &AtomicBool,
        poll_interval: Duration,
    ) -> Result<Option<String>> {
        loop {
            if !running.load(Ordering::Acquire) {
                return Ok(None);
            }

            self.accept_pending(running)?;

            match self.inbox.recv_timeout(poll_interval) {
                Ok(Inbound::Message(text)) => return Ok(Some(text)),
                Ok(Inbound::Wake) | Err(RecvTimeoutError::Timeout) => {}
                // The socket holds a sender, so this only happens while dropping
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Close the listener and every controller connection
    pub fn close(self) {
        let closed = close_all(&self.controllers);
        info!(
            "Subscriber socket on {} closed ({} controllers dropped)",
            self.local_addr, closed
        );
    }

    fn accept_pending(&mut self, running: &AtomicBool) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.add_controller(stream, addr, running),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(ref e)
                    if e.kind() == ErrorKind::ConnectionAborted
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn add_controller(&mut self, stream: TcpStream, addr: SocketAddr, running: &AtomicBool) {
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("Failed to set blocking mode for controller {}: {}", addr, e);
            return;
        }
        let registered = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!("Failed to clone controller stream {}: {}", addr, e);
                return;
            }
        };

        let id = self.next_controller_id;
        self.next_controller_id += 1;
        self.controllers.lock().insert(id, registered);

        // An interrupt between accept and registration would miss this stream
        if !running.load(Ordering::Acquire) {
            release(&self.controllers, id, &stream);
            return;
        }

        let link = ControllerLink {
            id,
            addr,
            subscriptions: Arc::clone(&self.subscriptions),
            inbox: self.inbox_tx.clone(),
            controllers: Arc::clone(&self.controllers),
        };
        let controllers = Arc::clone(&self.controllers);
        let spawned = thread::Builder::new()
            .name("relay-controller".to_string())
            .spawn(move || serve_controller(stream, link));
        if let Err(e) = spawned {
            warn!("Failed to spawn thread for controller {}: {}", addr, e);
            if let Some(registered) = controllers.lock().remove(&id) {
                let _ = registered.shutdown(Shutdown::Both);
            }
            return;
        }

        info!("Controller connected: {}", addr);
    }
}

/// Cross-thread handle that unblocks a pending [`SubSocket::recv`]
#[derive(Clone)]
pub struct SubInterrupter {
    inbox: Sender<Inbound>,
    controllers: ControllerMap,
}

impl SubInterrupter {
    /// Unblock the receiver and close all controller connections.
    /// The caller must clear the running flag first.
    pub fn interrupt(&self) {
        let closed = close_all(&self.controllers);
        debug!("Interrupt closed {} controller connections", closed);
        let _ = self.inbox.send(Inbound::Wake);
    }
}

/// What a controller thread needs from its socket
struct ControllerLink {
    id: u64,
    addr: SocketAddr,
    subscriptions: Arc<[String]>,
    inbox: Sender<Inbound>,
    controllers: ControllerMap,
}

/// Controller thread: handshake, subscribe, then forward messages until EOF
fn serve_controller(mut stream: TcpStream, link: ControllerLink) {
    let addr = link.addr;

    if let Err(e) = zmtp::handshake(&mut stream, SocketType::Sub) {
        warn!("Controller {} failed the handshake: {}", addr, e);
        release(&link.controllers, link.id, &stream);
        return;
    }

    let mut buffer = Vec::new();
    for prefix in link.subscriptions.iter() {
        let body = subscription_message(true, prefix.as_bytes());
        if let Err(e) = write_message(&mut stream, &[body.as_slice()], &mut buffer) {
            warn!("Failed to subscribe controller {}: {}", addr, e);
            release(&link.controllers, link.id, &stream);
            return;
        }
    }
    debug!("Controller {} ready", addr);

    loop {
        match read_message(&mut stream) {
            Ok(Some(parts)) => {
                let Some(text) = select_text(&link.subscriptions, parts) else {
                    continue;
                };
                if link.inbox.send(Inbound::Message(text)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("Controller disconnected: {}", addr);
                break;
            }
            Err(Error::Frame(reason)) => {
                warn!("Dropping controller {}: {}", addr, reason);
                break;
            }
            Err(Error::Io(e)) if is_disconnect(e.kind()) => {
                debug!("Controller {} connection lost: {}", addr, e);
                break;
            }
            Err(e) => {
                warn!("Controller {} read failed: {}", addr, e);
                break;
            }
        }
    }

    release(&link.controllers, link.id, &stream);
}

fn release(controllers: &ControllerMap, id: u64, stream: &TcpStream) {
    controllers.lock().remove(&id);
    let _ = stream.shutdown(Shutdown::Both);
}

fn close_all(controllers: &ControllerMap) -> usize {
    let mut controllers = controllers.lock();
    let count = controllers.len();
    for (_, stream) in controllers.drain() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    count
}

fn is_subscribed(subscriptions: &[String], topic: &[u8]) -> bool {
    subscriptions
        .iter()
        .any(|prefix| topic.starts_with(prefix.as_bytes()))
}

/// Apply the subscription filter and pick the message text
///
/// Single-frame messages are the text itself. For `[topic][text]` the
/// last frame carries the full message.
fn select_text(subscriptions: &[String], mut parts: Vec<Vec<u8>>) -> Option<String> {
    let topic_frame: &[u8] = if parts.len() > 1 {
        &parts[0]
    } else {
        let body = &parts[0];
        let end = body.iter().position(|&b| b == b':').unwrap_or(body.len());
        &body[..end]
    };

    if !is_subscribed(subscriptions, topic_frame) {
        trace!(
            "Discarding unsubscribed topic {:?}",
            String::from_utf8_lossy(topic_frame)
        );
        return None;
    }

    let body = parts.pop()?;
    match String::from_utf8(body) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Discarding non UTF-8 message: {}", e);
            None
        }
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}
