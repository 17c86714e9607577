//! Error types for the EdgeTwin environment abstraction.

use thiserror::Error;

/// Errors reported by a transport binding.
///
/// The session core treats every one of these as best-effort delivery
/// failure: it logs, counts, and moves on to the next tick.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Send failed (broker unreachable, socket error, bus offline, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The underlying channel or socket thread is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Payload could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The binding cannot honour the requested delivery semantic
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a channel-closed error naming the channel.
    pub fn closed(channel: impl std::fmt::Display) -> Self {
        Self::ChannelClosed(channel.to_string())
    }
}
