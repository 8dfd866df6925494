//! Error types for SetuIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transport socket failed to bind
    #[error("Failed to bind {role} socket to {address}: {source}")]
    Bind {
        /// Socket role ("publisher" or "subscriber")
        role: &'static str,
        /// Address that was requested
        address: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Endpoint string could not be understood
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Fixed step called with a non-positive or non-finite timestep
    #[error("Invalid timestep: {0} (must be finite and > 0)")]
    InvalidTimestep(f32),

    /// Joint id outside the articulation's DOF range
    #[error("Joint {id} out of range (articulation has {count} joints)")]
    JointOutOfRange {
        /// Requested joint id
        id: i64,
        /// Number of joints available
        count: usize,
    },

    /// Joint exists but no actuator is configured for it
    #[error("Joint {0} has no actuator")]
    NoActuator(i64),

    /// Physics substrate rejected an access
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// Malformed frame on the wire
    #[error("Frame error: {0}")]
    Frame(String),

    /// Peer failed the ZMTP greeting or READY exchange
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Background thread could not be spawned
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
