//! In-process pub/sub bus with retained values and fault injection.

use async_trait::async_trait;
use edgetwin_env::{Message, Publisher, Subscriber, TransportError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

struct Slot {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BusState {
    /// Last retained payload per channel
    retained: HashMap<String, Vec<u8>>,

    /// Connected endpoints by id
    slots: BTreeMap<u64, Slot>,

    next_id: u64,
    offline: bool,
    delivered: u64,
    rejected: u64,
}

/// Delivery counters for a [`LocalBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Messages handed to subscriber queues
    pub delivered: u64,

    /// Sends refused while the bus was offline
    pub rejected: u64,
}

/// In-process broker.
///
/// Every endpoint gets its own FIFO queue, so messages from one publisher
/// reach each subscriber in publish order.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connects a new endpoint.
    pub fn endpoint(&self) -> LocalEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            Slot {
                channels: HashSet::new(),
                tx,
            },
        );

        LocalEndpoint {
            id,
            bus: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Takes the bus offline (sends fail) or brings it back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
        debug!("Local bus {}", if offline { "offline" } else { "online" });
    }

    pub fn is_offline(&self) -> bool {
        self.lock().offline
    }

    /// Returns the retained payload on `channel`, if any.
    pub fn retained(&self, channel: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(channel).cloned()
    }

    pub fn stats(&self) -> BusStats {
        let state = self.lock();
        BusStats {
            delivered: state.delivered,
            rejected: state.rejected,
        }
    }

    fn publish(&self, channel: &str, payload: Vec<u8>, retained: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.offline {
            state.rejected += 1;
            return Err(TransportError::network("local bus offline"));
        }

        if retained {
            state.retained.insert(channel.to_string(), payload.clone());
        }

        let mut delivered = 0;
        for slot in state.slots.values().filter(|s| s.channels.contains(channel)) {
            let message = Message {
                channel: channel.to_string(),
                payload: payload.clone(),
                retained,
            };
            if slot.tx.send(message).is_ok() {
                delivered += 1;
            }
        }
        state.delivered += delivered;
        Ok(())
    }

    fn subscribe(&self, id: u64, channel: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        let replay = state.retained.get(channel).cloned();
        let slot = state
            .slots
            .get_mut(&id)
            .ok_or_else(|| TransportError::closed(channel))?;

        if !slot.channels.insert(channel.to_string()) {
            return Ok(());
        }
        if let Some(payload) = replay {
            // A dropped receiver is detached on endpoint drop
            let _ = slot.tx.send(Message::retained(channel, payload));
            state.delivered += 1;
        }
        Ok(())
    }

    fn detach(&self, id: u64) {
        self.lock().slots.remove(&id);
    }
}

/// One client connection to a [`LocalBus`].
pub struct LocalEndpoint {
    id: u64,
    bus: LocalBus,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl LocalEndpoint {
    /// Returns the next queued message without waiting.
    pub fn try_recv(&self) -> Option<Message> {
        self.inbox.try_lock().ok()?.try_recv().ok()
    }

    /// Drains every queued message.
    pub fn drain(&self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.bus.detach(self.id);
    }
}

#[async_trait]
impl Publisher for LocalEndpoint {
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.bus.publish(channel, payload, false)
    }

    async fn publish_retained(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.bus.publish(channel, payload, true)
    }
}

#[async_trait]
impl Subscriber for LocalEndpoint {
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.bus.subscribe(self.id, channel)
    }

    async fn recv(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_retained_value_reaches_late_subscriber() {
        let bus = LocalBus::new();
        let node = bus.endpoint();
        node.publish_retained("status", b"READY".to_vec()).await.unwrap();

        let twin = bus.endpoint();
        twin.subscribe("status").await.unwrap();

        let message = twin.recv().await.unwrap();
        assert_eq!(message.text(), Some("READY"));
        assert!(message.retained);
        assert_eq!(bus.retained("status"), Some(b"READY".to_vec()));
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_replay() {
        let bus = LocalBus::new();
        let node = bus.endpoint();
        node.publish_retained("status", b"READY".to_vec()).await.unwrap();

        let twin = bus.endpoint();
        twin.subscribe("status").await.unwrap();
        twin.subscribe("status").await.unwrap();

        assert_eq!(twin.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = LocalBus::new();
        let publisher = bus.endpoint();
        let a = bus.endpoint();
        let b = bus.endpoint();
        a.subscribe("ticks").await.unwrap();
        b.subscribe("ticks").await.unwrap();

        for i in 0..20u8 {
            publisher.send("ticks", vec![i]).await.unwrap();
        }

        let expected: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i]).collect();
        let got_a: Vec<Vec<u8>> = a.drain().into_iter().map(|m| m.payload).collect();
        let got_b: Vec<Vec<u8>> = b.drain().into_iter().map(|m| m.payload).collect();
        assert_eq!(got_a, expected);
        assert_eq!(got_b, expected);
        assert_eq!(bus.stats().delivered, 40);
    }

    #[tokio::test]
    async fn test_unsubscribed_channels_not_delivered() {
        let bus = LocalBus::new();
        let publisher = bus.endpoint();
        let listener = bus.endpoint();
        listener.subscribe("bootstrap").await.unwrap();

        publisher.send("ticks", b"x".to_vec()).await.unwrap();
        assert!(listener.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_offline_bus_rejects_sends() {
        let bus = LocalBus::new();
        let publisher = bus.endpoint();
        let listener = bus.endpoint();
        listener.subscribe("ticks").await.unwrap();

        bus.set_offline(true);
        let err = publisher.send("ticks", b"lost".to_vec()).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));

        bus.set_offline(false);
        publisher.send("ticks", b"kept".to_vec()).await.unwrap();

        let received = listener.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text(), Some("kept"));
        assert_eq!(bus.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_dropped_endpoint_detaches() {
        let bus = LocalBus::new();
        let publisher = bus.endpoint();
        {
            let listener = bus.endpoint();
            listener.subscribe("ticks").await.unwrap();
        }
        publisher.send("ticks", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.stats().delivered, 0);
    }

    proptest! {
        #[test]
        fn prop_every_subscriber_sees_publish_order(payloads in prop::collection::vec(any::<u8>(), 0..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let bus = LocalBus::new();
                let publisher = bus.endpoint();
                let a = bus.endpoint();
                let b = bus.endpoint();
                a.subscribe("ticks").await.unwrap();
                b.subscribe("ticks").await.unwrap();

                for p in &payloads {
                    publisher.send("ticks", vec![*p]).await.unwrap();
                }

                let expected: Vec<Vec<u8>> = payloads.iter().map(|p| vec![*p]).collect();
                let got_a: Vec<Vec<u8>> = a.drain().into_iter().map(|m| m.payload).collect();
                let got_b: Vec<Vec<u8>> = b.drain().into_iter().map(|m| m.payload).collect();
                assert_eq!(got_a, expected);
                assert_eq!(got_b, expected);
            });
        }
    }
}
