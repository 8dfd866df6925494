//! ZMTP 3.0 connection setup (NULL security mechanism)
//!
//! Both sockets speak enough ZMTP for ZeroMQ PUB/SUB peers (libzmq, pyzmq,
//! NetMQ) to connect to them directly.
//!
//! # Greeting
//!
//! Each side sends a fixed 64-byte greeting:
//!
//! ```text
//! ┌──────────────────────┬─────────┬─────────────────┬───────────┬────────┐
//! │ 0xFF pad[8] 0x7F     │ 3, 0    │ "NULL" + zeros  │ as-server │ filler │
//! │ 10 bytes             │ 2 bytes │ 20 bytes        │ 1 byte    │ 31     │
//! └──────────────────────┴─────────┴─────────────────┴───────────┴────────┘
//! ```
//!
//! Version 3.0 is announced so 3.1 peers fall back to message-form
//! subscriptions (`0x01` + prefix to subscribe, `0x00` + prefix to cancel).
//!
//! # READY
//!
//! After the greeting both sides send a `READY` command carrying metadata
//! properties (`[name len u8][name][value len u32 BE][value]`). The
//! `Socket-Type` property must name a compatible socket.

use crate::error::{Error, Result};
use crate::streaming::frame::{Incoming, read_incoming, write_command};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Time a peer gets to complete the greeting and READY exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Length of the greeting
pub const GREETING_LEN: usize = 64;

const MAJOR_VERSION: u8 = 3;
const MINOR_VERSION: u8 = 0;
const MECHANISM_NULL: &[u8] = b"NULL";
const MECHANISM_LEN: usize = 20;

/// Subscription message prefix bytes
pub const SUBSCRIBE: u8 = 0x01;
pub const UNSUBSCRIBE: u8 = 0x00;

/// ZeroMQ socket types relevant to pub/sub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Pub,
    Sub,
    XPub,
    XSub,
}

impl SocketType {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketType::Pub => "PUB",
            SocketType::Sub => "SUB",
            SocketType::XPub => "XPUB",
            SocketType::XSub => "XSUB",
        }
    }

    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"PUB" => Some(SocketType::Pub),
            b"SUB" => Some(SocketType::Sub),
            b"XPUB" => Some(SocketType::XPub),
            b"XSUB" => Some(SocketType::XSub),
            _ => None,
        }
    }

    /// Whether a peer of type `peer` may connect to this socket
    pub fn accepts(self, peer: SocketType) -> bool {
        let publishes = |t: SocketType| matches!(t, SocketType::Pub | SocketType::XPub);
        publishes(self) != publishes(peer)
    }
}

/// Build our greeting
pub fn greeting() -> [u8; GREETING_LEN] {
    let mut greeting = [0u8; GREETING_LEN];
    greeting[0] = 0xFF;
    greeting[9] = 0x7F;
    greeting[10] = MAJOR_VERSION;
    greeting[11] = MINOR_VERSION;
    greeting[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    greeting
}

/// Validate a peer greeting
pub fn check_greeting(peer: &[u8; GREETING_LEN]) -> Result<()> {
    if peer[0] != 0xFF || peer[9] & 0x01 != 0x01 {
        return Err(Error::Handshake("peer is not a ZMTP endpoint".to_string()));
    }
    if peer[10] < MAJOR_VERSION {
        return Err(Error::Handshake(format!(
            "unsupported ZMTP version {}.{}",
            peer[10], peer[11]
        )));
    }

    let mechanism = &peer[12..12 + MECHANISM_LEN];
    let name_end = mechanism.iter().position(|&b| b == 0).unwrap_or(MECHANISM_LEN);
    if &mechanism[..name_end] != MECHANISM_NULL {
        return Err(Error::Handshake(format!(
            "unsupported security mechanism {:?}",
            String::from_utf8_lossy(&mechanism[..name_end])
        )));
    }
    Ok(())
}

/// Encode metadata properties for a `READY` command
pub fn encode_properties(properties: &[(&str, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    for (name, value) in properties {
        data.push(name.len() as u8);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(&(value.len() as u32).to_be_bytes());
        data.extend_from_slice(value);
    }
    data
}

/// Look up a property in `READY` metadata (names are case-insensitive)
pub fn find_property<'a>(mut data: &'a [u8], wanted: &str) -> Result<Option<&'a [u8]>> {
    let truncated = || Error::Handshake("truncated READY metadata".to_string());

    while let Some((&name_len, rest)) = data.split_first() {
        let name_len = name_len as usize;
        let name = rest.get(..name_len).ok_or_else(truncated)?;
        let rest = &rest[name_len..];

        let size = rest.get(..4).ok_or_else(truncated)?;
        let value_len = u32::from_be_bytes([size[0], size[1], size[2], size[3]]) as usize;
        let rest = &rest[4..];
        let value = rest.get(..value_len).ok_or_else(truncated)?;

        if name.eq_ignore_ascii_case(wanted.as_bytes()) {
            return Ok(Some(value));
        }
        data = &rest[value_len..];
    }
    Ok(None)
}

/// Run the greeting and READY exchange on any byte stream
///
/// Returns the peer's socket type.
pub fn exchange<S: Read + Write>(stream: &mut S, ours: SocketType) -> Result<SocketType> {
    stream.write_all(&greeting())?;
    stream.flush()?;

    let mut peer = [0u8; GREETING_LEN];
    stream.read_exact(&mut peer)?;
    check_greeting(&peer)?;

    let mut buffer = Vec::new();
    let metadata = encode_properties(&[("Socket-Type", ours.as_str().as_bytes())]);
    write_command(stream, "READY", &metadata, &mut buffer)?;

    let data = match read_incoming(stream)? {
        Some(Incoming::Command { name, data }) if name == "READY" => data,
        Some(Incoming::Command { name, .. }) => {
            return Err(Error::Handshake(format!("expected READY, got {}", name)));
        }
        Some(Incoming::Message(_)) => {
            return Err(Error::Handshake("expected READY, got a message".to_string()));
        }
        None => return Err(Error::Handshake("peer closed during handshake".to_string())),
    };

    let peer_type = find_property(&data, "Socket-Type")?
        .and_then(SocketType::parse)
        .ok_or_else(|| Error::Handshake("missing or unknown Socket-Type".to_string()))?;

    if !ours.accepts(peer_type) {
        return Err(Error::Handshake(format!(
            "{} socket cannot talk to {}",
            ours.as_str(),
            peer_type.as_str()
        )));
    }
    Ok(peer_type)
}

/// Handshake on a TCP stream, bounded by [`HANDSHAKE_TIMEOUT`]
pub fn handshake(stream: &mut TcpStream, ours: SocketType) -> Result<SocketType> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let peer = exchange(stream, ours)?;
    stream.set_read_timeout(None)?;
    Ok(peer)
}

/// Body of a subscribe (`0x01`) or cancel (`0x00`) message
pub fn subscription_message(subscribe: bool, prefix: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(prefix.len() + 1);
    body.push(if subscribe { SUBSCRIBE } else { UNSUBSCRIBE });
    body.extend_from_slice(prefix);
    body
}
