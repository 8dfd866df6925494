//! ZMTP 3.0 frame codec
//!
//! # Wire Format
//!
//! After the greeting (see [`crate::streaming::zmtp`]) the stream is a
//! sequence of frames:
//!
//! ```text
//! short frame: ┌───────┬──────────────┬─────────────┐
//!              │ Flags │ Size (1 B)   │ Body        │
//!              └───────┴──────────────┴─────────────┘
//! long frame:  ┌───────┬──────────────┬─────────────┐
//!              │ Flags │ Size (8 B BE)│ Body        │
//!              └───────┴──────────────┴─────────────┘
//! ```
//!
//! - **Flags**: bit 0 `MORE` (more frames follow), bit 1 `LONG` (8-byte
//!   size), bit 2 `COMMAND`; the other bits must be zero
//! - Bodies up to 255 bytes use the short form
//! - **Maximum frame size**: 1MB (1,048,576 bytes)
//!
//! A message is one or more data frames. The publisher sends
//! `[topic][TOPIC:payload]`; controllers may send either a single
//! `TOPIC:payload` frame or the same two-frame form. The message text itself
//! carries no length prefix.
//!
//! A command is a single frame with the `COMMAND` flag:
//! `[name length u8][name][data]`.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// Flag bit: more frames follow in this message
pub const FLAG_MORE: u8 = 0x01;

/// Flag bit: size field is 8 bytes
pub const FLAG_LONG: u8 = 0x02;

/// Flag bit: frame is a command
pub const FLAG_COMMAND: u8 = 0x04;

const RESERVED_FLAGS: u8 = !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND);

/// Largest body that fits the short size field
const SHORT_FRAME_MAX: usize = u8::MAX as usize;

/// Maximum body size of a single frame
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum number of frames in one message
pub const MAX_FRAMES_PER_MESSAGE: usize = 16;

/// One unit read off a ZMTP stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Data frames of one message
    Message(Vec<Vec<u8>>),
    /// A command frame (`READY`, `SUBSCRIBE`, `PING`, ...)
    Command { name: String, data: Vec<u8> },
}

fn push_frame(flags: u8, body: &[u8], buffer: &mut Vec<u8>) -> Result<()> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::Frame(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }

    if body.len() <= SHORT_FRAME_MAX {
        buffer.push(flags);
        buffer.push(body.len() as u8);
    } else {
        buffer.push(flags | FLAG_LONG);
        buffer.extend_from_slice(&(body.len() as u64).to_be_bytes());
    }
    buffer.extend_from_slice(body);
    Ok(())
}

/// Encode a multipart message into `buffer` (cleared first)
pub fn encode_message(parts: &[&[u8]], buffer: &mut Vec<u8>) -> Result<()> {
    if parts.is_empty() {
        return Err(Error::Frame("message has no frames".to_string()));
    }
    if parts.len() > MAX_FRAMES_PER_MESSAGE {
        return Err(Error::Frame(format!(
            "message exceeds {} frames",
            MAX_FRAMES_PER_MESSAGE
        )));
    }

    buffer.clear();
    for (i, part) in parts.iter().enumerate() {
        let flags = if i + 1 < parts.len() { FLAG_MORE } else { 0 };
        push_frame(flags, part, buffer)?;
    }
    Ok(())
}

/// Encode a command frame into `buffer` (cleared first)
pub fn encode_command(name: &str, data: &[u8], buffer: &mut Vec<u8>) -> Result<()> {
    let name_len = u8::try_from(name.len())
        .map_err(|_| Error::Frame(format!("command name too long: {}", name)))?;

    let mut body = Vec::with_capacity(1 + name.len() + data.len());
    body.push(name_len);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(data);

    buffer.clear();
    push_frame(FLAG_COMMAND, &body, buffer)
}

/// Write a multipart message to a stream
///
/// Uses `buffer` as scratch space so the whole message goes out in one write.
pub fn write_message<W: Write>(
    writer: &mut W,
    parts: &[&[u8]],
    buffer: &mut Vec<u8>,
) -> Result<()> {
    encode_message(parts, buffer)?;
    writer.write_all(buffer)?;
    writer.flush()?;
    Ok(())
}

/// Write a command frame to a stream
pub fn write_command<W: Write>(
    writer: &mut W,
    name: &str,
    data: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<()> {
    encode_command(name, data, buffer)?;
    writer.write_all(buffer)?;
    writer.flush()?;
    Ok(())
}

/// Read the next message or command
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// messages. EOF in the middle of a message is an error.
pub fn read_incoming<R: Read>(reader: &mut R) -> Result<Option<Incoming>> {
    let mut parts = Vec::new();

    loop {
        let mut flags = [0u8; 1];
        match reader.read_exact(&mut flags) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && parts.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        }
        let flags = flags[0];

        if flags & RESERVED_FLAGS != 0 {
            return Err(Error::Frame(format!("reserved flag bits set: {:#04x}", flags)));
        }

        let len = if flags & FLAG_LONG != 0 {
            let mut size = [0u8; 8];
            reader.read_exact(&mut size)?;
            u64::from_be_bytes(size)
        } else {
            let mut size = [0u8; 1];
            reader.read_exact(&mut size)?;
            u64::from(size[0])
        };

        // Sanity check on length
        if len > MAX_FRAME_SIZE as u64 {
            return Err(Error::Frame(format!("frame too large: {} bytes", len)));
        }

        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body)?;

        if flags & FLAG_COMMAND != 0 {
            if flags & FLAG_MORE != 0 || !parts.is_empty() {
                return Err(Error::Frame(
                    "command frame inside a multipart message".to_string(),
                ));
            }
            return parse_command(body).map(Some);
        }

        parts.push(body);
        if flags & FLAG_MORE == 0 {
            return Ok(Some(Incoming::Message(parts)));
        }
        if parts.len() >= MAX_FRAMES_PER_MESSAGE {
            return Err(Error::Frame(format!(
                "message exceeds {} frames",
                MAX_FRAMES_PER_MESSAGE
            )));
        }
    }
}

/// Read the next data message, skipping commands
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>> {
    loop {
        match read_incoming(reader)? {
            Some(Incoming::Message(parts)) => return Ok(Some(parts)),
            Some(Incoming::Command { name, .. }) => {
                log::trace!("Ignoring {} command", name);
            }
            None => return Ok(None),
        }
    }
}

fn parse_command(body: Vec<u8>) -> Result<Incoming> {
    let Some((&name_len, rest)) = body.split_first() else {
        return Err(Error::Frame("empty command frame".to_string()));
    };
    let name_len = name_len as usize;
    if rest.len() < name_len {
        return Err(Error::Frame("command name exceeds frame".to_string()));
    }

    let name = String::from_utf8(rest[..name_len].to_vec())
        .map_err(|_| Error::Frame("command name is not ASCII".to_string()))?;
    Ok(Incoming::Command {
        name,
        data: rest[name_len..].to_vec(),
    })
}
