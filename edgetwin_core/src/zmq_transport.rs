//! ZeroMQ Publisher/Subscriber bindings.
//!
//! ZMQ sockets are not `Sync`, so each endpoint owns its socket on a
//! dedicated thread and the async side talks to it over channels.
//!
//! Frames on the wire: `[channel, flags, payload]`, where `flags` is a single
//! byte (`1` = retained). Subscribers filter on the channel frame by prefix
//! (ZMQ) and then by exact match (here).
//!
//! Retained delivery uses an XPUB socket in verbose mode: every subscription
//! frame reaching the publisher triggers a replay of the cached last values
//! whose channel matches the subscribed prefix.

use edgetwin_env::{Message, Publisher, Subscriber, TransportError};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

const FLAG_LIVE: u8 = 0;
const FLAG_RETAINED: u8 = 1;

/// Poll period of the socket threads.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn zmq_error(e: zmq::Error) -> TransportError {
    TransportError::network(format!("ZMQ error: {}", e))
}

// =============================================================================
// PUBLISHER
// =============================================================================

struct Outbound {
    channel: String,
    payload: Vec<u8>,
    retained: bool,
}

/// XPUB-backed publisher with a last-value cache for retained channels.
pub struct ZmqPublisher {
    endpoint: String,
    outbound: std_mpsc::Sender<Outbound>,
}

impl ZmqPublisher {
    /// Binds an XPUB socket to `endpoint` (e.g. `tcp://*:5556`).
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::XPUB).map_err(zmq_error)?;
        socket.set_xpub_verbose(true).map_err(zmq_error)?;
        socket.set_rcvtimeo(0).map_err(zmq_error)?;
        socket.bind(endpoint).map_err(zmq_error)?;

        let (tx, rx) = std_mpsc::channel();
        thread::Builder::new()
            .name("edgetwin-zmq-pub".into())
            .spawn(move || publisher_loop(context, socket, rx))
            .map_err(|e| TransportError::network(e.to_string()))?;

        info!("✓ ZMQ publisher bound to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            outbound: tx,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn enqueue(&self, channel: &str, payload: Vec<u8>, retained: bool) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound {
                channel: channel.to_string(),
                payload,
                retained,
            })
            .map_err(|_| TransportError::closed(&self.endpoint))
    }
}

fn send_frames(socket: &zmq::Socket, channel: &str, flag: u8, payload: &[u8]) {
    let frames: [&[u8]; 3] = [channel.as_bytes(), &[flag], payload];
    if let Err(e) = socket.send_multipart(frames, 0) {
        warn!("ZMQ send on '{}' failed: {}", channel, e);
    }
}

fn publisher_loop(_context: zmq::Context, socket: zmq::Socket, rx: std_mpsc::Receiver<Outbound>) {
    let mut retained: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                let flag = if message.retained { FLAG_RETAINED } else { FLAG_LIVE };
                send_frames(&socket, &message.channel, flag, &message.payload);
                if message.retained {
                    retained.insert(message.channel, message.payload);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // Subscription frames: 0x01 + prefix on subscribe, 0x00 + prefix on unsubscribe
        while let Ok(frame) = socket.recv_bytes(zmq::DONTWAIT) {
            if frame.first() != Some(&1) {
                continue;
            }
            let prefix = &frame[1..];
            for (channel, payload) in retained.iter().filter(|(c, _)| c.as_bytes().starts_with(prefix)) {
                debug!("Replaying retained value on '{}'", channel);
                send_frames(&socket, channel, FLAG_RETAINED, payload);
            }
        }
    }
    debug!("ZMQ publisher thread exiting");
}

#[async_trait]
impl Publisher for ZmqPublisher {
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.enqueue(channel, payload, false)
    }

    async fn publish_retained(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.enqueue(channel, payload, true)
    }
}

// =============================================================================
// SUBSCRIBER
// =============================================================================

/// SUB-backed subscriber.
pub struct ZmqSubscriber {
    endpoint: String,
    subscribe: std_mpsc::Sender<String>,
    inbox: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl ZmqSubscriber {
    /// Connects a SUB socket to `endpoint` (e.g. `tcp://127.0.0.1:5557`).
    pub fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).map_err(zmq_error)?;
        socket
            .set_rcvtimeo(POLL_INTERVAL.as_millis() as i32)
            .map_err(zmq_error)?;
        socket.connect(endpoint).map_err(zmq_error)?;

        let (sub_tx, sub_rx) = std_mpsc::channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("edgetwin-zmq-sub".into())
            .spawn(move || subscriber_loop(context, socket, sub_rx, msg_tx))
            .map_err(|e| TransportError::network(e.to_string()))?;

        info!("✓ ZMQ subscriber connected to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            subscribe: sub_tx,
            inbox: Mutex::new(msg_rx),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn subscriber_loop(
    _context: zmq::Context,
    socket: zmq::Socket,
    subscriptions: std_mpsc::Receiver<String>,
    inbox: mpsc::UnboundedSender<Message>,
) {
    let mut channels: HashSet<String> = HashSet::new();

    loop {
        loop {
            match subscriptions.try_recv() {
                Ok(channel) => {
                    if let Err(e) = socket.set_subscribe(channel.as_bytes()) {
                        warn!("ZMQ subscribe to '{}' failed: {}", channel, e);
                        continue;
                    }
                    channels.insert(channel);
                }
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => {
                    debug!("ZMQ subscriber thread exiting");
                    return;
                }
            }
        }

        let parts = match socket.recv_multipart(0) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("ZMQ receive failed: {}", e);
                return;
            }
        };

        let [channel, flags, payload]: [Vec<u8>; 3] = match parts.try_into() {
            Ok(frames) => frames,
            Err(parts) => {
                debug!("Dropping ZMQ message with {} frames", parts.len());
                continue;
            }
        };

        let Ok(channel) = String::from_utf8(channel) else {
            continue;
        };
        if !channels.contains(&channel) {
            continue;
        }

        let message = if flags.first() == Some(&FLAG_RETAINED) {
            Message::retained(channel, payload)
        } else {
            Message::new(channel, payload)
        };
        if inbox.send(message).is_err() {
            return;
        }
    }
}

#[async_trait]
impl Subscriber for ZmqSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.subscribe
            .send(channel.to_string())
            .map_err(|_| TransportError::closed(&self.endpoint))
    }

    async fn recv(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }
}
