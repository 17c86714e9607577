//! Transport capability traits.
//!
//! MQTT, ZeroMQ and in-process buses are interchangeable behind these two
//! traits; business logic never branches on the transport in use.

use async_trait::async_trait;
use crate::error::TransportError;
use crate::types::Message;

/// Outbound half of a transport.
///
/// # Delivery contract
///
/// ```text
/// Node                      Transport                   Consumer
///   |-- send(ch, tick1) ------->|                           |
///   |-- send(ch, tick2) ------->|-- tick1 ----------------->|
///   |                           |-- tick2 ----------------->|   (program order)
/// ```
///
/// `send` is fire-and-forget: `Ok(())` means "handed to the transport", not
/// "delivered". Calls from one publisher must reach consumers in call order.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publishes a payload on `channel`.
    ///
    /// # Returns
    /// * `Ok(())` - Payload queued for delivery
    /// * `Err(TransportError)` - Immediate failure; the caller does not retry
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Publishes a last-value payload on `channel`.
    ///
    /// Subscribers that connect later still observe the most recent retained
    /// payload. Replaying the same value is harmless.
    async fn publish_retained(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Inbound half of a transport.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Starts receiving messages published on `channel`.
    ///
    /// If the channel holds a retained payload it is delivered first.
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Receives the next message on any subscribed channel.
    ///
    /// # Returns
    /// * `Some(message)` - A message arrived
    /// * `None` - The transport was closed (shutdown)
    async fn recv(&self) -> Option<Message>;
}
