//! In-memory transport doubles for unit tests.

use crate::scheduler::StopSignal;
use async_trait::async_trait;
use edgetwin_env::{Message, Publisher, Subscriber, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Publisher that records everything it is handed.
pub struct RecordingPublisher {
    sent: Mutex<Vec<Message>>,
    failing: AtomicBool,
    stop_after: Option<(usize, StopSignal)>,
    sends: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            stop_after: None,
            sends: AtomicUsize::new(0),
        }
    }

    /// Raises `stop` once `count` sends have been attempted.
    pub fn stop_after(mut self, count: usize, stop: StopSignal) -> Self {
        self.stop_after = Some((count, stop));
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages sent (live or retained) on `channel`, in order.
    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    fn record(&self, message: Message) -> Result<(), TransportError> {
        let attempts = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, stop)) = &self.stop_after {
            if attempts >= *count {
                stop.stop();
            }
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::network("recording publisher offline"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.record(Message::new(channel, payload))
    }

    async fn publish_retained(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.record(Message::retained(channel, payload))
    }
}

/// Subscriber fed by the test through a channel.
pub struct ScriptedSubscriber {
    subscriptions: Mutex<Vec<String>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl ScriptedSubscriber {
    /// Returns the subscriber and the sender used to feed it.
    pub fn new() -> (Self, mpsc::UnboundedSender<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Self {
            subscriptions: Mutex::new(Vec::new()),
            inbox: tokio::sync::Mutex::new(rx),
        };
        (subscriber, tx)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for ScriptedSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }
}
