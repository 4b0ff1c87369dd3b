//! Busway error types.
//!
//! Every setup-phase failure kind maps to a distinct process exit code via
//! [`BuswayError::exit_code`], so a supervisor can tell a taken name from an
//! unreachable daemon without parsing log output. Setup errors are fatal to
//! the bootstrap sequence; per-call application faults are *not* errors at
//! this level and travel back to the caller as
//! [`FaultInfo`](crate::dispatch::FaultInfo) replies instead.

use thiserror::Error;

/// Busway errors.
#[derive(Error, Debug)]
pub enum BuswayError {
    /// Object registration failed (path occupied, or the bus is unreachable).
    #[error("Registration error: {0}")]
    Registration(String),

    /// Transport connection to the bus could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session port is already bound locally.
    #[error("Session port {0} already bound")]
    PortInUse(u16),

    /// Another endpoint holds the well-known name.
    #[error("Name taken: {0}")]
    NameTaken(String),

    /// Advertising the well-known name failed.
    #[error("Advertise error: {0}")]
    Advertise(String),

    /// A declared signature uses an unrecognized or malformed type tag.
    #[error("Invalid signature {signature:?}: {reason}")]
    InvalidSignature {
        /// The offending signature string.
        signature: String,
        /// What made it invalid.
        reason: String,
    },

    /// A method call did not complete within its reply timeout.
    #[error("Dispatch timeout: {method} exceeded {timeout_ms} ms")]
    DispatchTimeout {
        /// Method that timed out.
        method: String,
        /// Effective reply timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Method name not present in the interface descriptor table.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Protocol-level error (operation attempted in the wrong state).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Busway operations
pub type Result<T> = std::result::Result<T, BuswayError>;

impl BuswayError {
    /// Process exit code for this error kind.
    ///
    /// Setup-phase failures get codes in the 10..20 range, one per taxonomy
    /// entry, so every abort reason is distinguishable from the shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Registration(_) => 10,
            Self::Connection(_) => 11,
            Self::PortInUse(_) => 12,
            Self::NameTaken(_) => 13,
            Self::Advertise(_) => 14,
            Self::InvalidSignature { .. } => 15,
            Self::DispatchTimeout { .. } => 16,
            Self::UnknownMethod(_) => 17,
            Self::Protocol(_) => 18,
            Self::Config(_) => 19,
            Self::Json(_) => 20,
            Self::Io(_) => 21,
        }
    }
}

impl From<toml::de::Error> for BuswayError {
    fn from(err: toml::de::Error) -> Self {
        BuswayError::Config(err.to_string())
    }
}
