//! Error types for the EdgeTwin session core.
//!
//! Transport failures live in `edgetwin_env::TransportError`; everything
//! here is raised by the core itself. None of these is fatal to the process:
//! the node logs, keeps its state, and carries on.

use crate::session::Phase;
use thiserror::Error;

/// Rejection of an inbound bootstrap payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BootstrapError {
    /// Payload is not a decodable JSON object
    #[error("Malformed bootstrap payload: {0}")]
    Malformed(String),

    /// A required field is absent or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A numeric field is outside its allowed range
    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    /// A session was already started (or the node shut down)
    #[error("Duplicate bootstrap: session already {0}")]
    DuplicateSession(Phase),
}

impl BootstrapError {
    /// True for validation failures (as opposed to duplicate deliveries).
    pub fn is_validation(&self) -> bool {
        !matches!(self, BootstrapError::DuplicateSession(_))
    }
}

/// Errors from growth-model construction or mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Drug doses must be finite and non-negative
    #[error("Invalid drug dose: {0}")]
    InvalidDose(f64),

    /// A model parameter is outside its domain
    #[error("Invalid model parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Errors from operations on a running session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The operation needs a running session
    #[error("No running session (node is {0})")]
    NotRunning(Phase),

    /// The command named a site this session does not simulate
    #[error("Unknown site: {0}")]
    UnknownSite(String),

    /// Inbound command could not be decoded
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// The model rejected the operation
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Invalid node configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Tick rate must be positive and finite, got {0}")]
    InvalidTickRate(f64),

    #[error("At least one site must be configured")]
    NoSites,

    #[error("Site ids must be non-empty")]
    EmptySiteId,

    #[error("Duplicate site id: {0}")]
    DuplicateSite(String),

    #[error("Site {site}: {reason}")]
    InvalidSite { site: String, reason: String },

    #[error("Channel {0} must be non-empty")]
    EmptyChannel(&'static str),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}
