//! Comma-separated number lists used in message payloads
//!
//! Floats are written with Rust's shortest round-trip formatting, so
//! `parse_f32_list(&format_list(v))` reproduces `v` exactly.

use super::command::ProtocolError;
use std::fmt::Display;
use std::str::FromStr;

/// Join values with commas
pub fn format_list<T: Display>(values: &[T]) -> String {
    let mut out = String::with_capacity(values.len() * 8);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        // Writing into a String cannot fail
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{}", value));
    }
    out
}

/// Parse one field of a payload; `index` is only used for error reporting
pub fn parse_field<T: FromStr>(text: &str, index: usize) -> Result<T, ProtocolError> {
    text.trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::InvalidNumber {
            value: text.to_string(),
            index,
        })
}

/// Parse one finite f32 field
pub fn parse_f32(text: &str, index: usize) -> Result<f32, ProtocolError> {
    let value: f32 = parse_field(text, index)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidNumber {
            value: text.to_string(),
            index,
        })
    }
}

/// Parse a comma-separated list of finite floats
///
/// Every field must parse; an empty payload is one empty (invalid) field.
pub fn parse_f32_list(payload: &str) -> Result<Vec<f32>, ProtocolError> {
    payload
        .split(',')
        .enumerate()
        .map(|(index, field)| parse_f32(field, index))
        .collect()
}
