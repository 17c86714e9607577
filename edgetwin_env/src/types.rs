//! Common types for the EdgeTwin environment abstraction.

use serde::{Deserialize, Serialize};

/// A message as seen by a subscriber.
///
/// The payload is opaque bytes; decoding belongs to the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Logical channel (MQTT topic, ZeroMQ prefix, ...)
    pub channel: String,

    /// The raw payload bytes
    pub payload: Vec<u8>,

    /// True when this is a replay of a retained (last-value) payload
    pub retained: bool,
}

impl Message {
    /// Creates a live (non-retained) message.
    pub fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            payload,
            retained: false,
        }
    }

    /// Creates a message flagged as a retained replay.
    pub fn retained(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            payload,
            retained: true,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the payload as UTF-8 text, if it is valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
