//! Endpoint address parsing
//!
//! Accepts the `tcp://host:port` form used by pub/sub tooling as well as a
//! bare `host:port`:
//!
//! | Input | Bind address |
//! |-------|--------------|
//! | `tcp://*:5555` | `0.0.0.0:5555` |
//! | `tcp://localhost:5555` | `127.0.0.1:5555` |
//! | `127.0.0.1:5556` | `127.0.0.1:5556` |

use crate::error::{Error, Result};

const TCP_SCHEME: &str = "tcp://";

/// Normalize an endpoint string into a `host:port` bind address
pub fn to_bind_address(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    let rest = match trimmed.strip_prefix(TCP_SCHEME) {
        Some(rest) => rest,
        None if trimmed.contains("://") => {
            return Err(Error::InvalidEndpoint(format!(
                "unsupported transport in '{}'",
                endpoint
            )));
        }
        None => trimmed,
    };

    let Some((host, port)) = rest.rsplit_once(':') else {
        return Err(Error::InvalidEndpoint(format!(
            "missing port in '{}'",
            endpoint
        )));
    };

    let port: u16 = port
        .parse()
        .map_err(|_| Error::InvalidEndpoint(format!("invalid port in '{}'", endpoint)))?;

    let host = match host {
        "" | "*" => "0.0.0.0",
        "localhost" => "127.0.0.1",
        other => other,
    };

    Ok(format!("{}:{}", host, port))
}
