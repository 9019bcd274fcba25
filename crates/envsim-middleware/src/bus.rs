//! In-process broker for headless runs.
//!
//! [`MemoryBroker`] stands in for an MQTT broker: every message published
//! through any of its transports is fanned out over a single
//! [`tokio::sync::broadcast`] channel, and each [`MemoryTransport`] forwards
//! the control-topic traffic to its own sensor.  This lets the whole fleet
//! run in tests and CI pipelines without a network.
//!
//! # Example
//!
//! ```rust
//! use envsim_middleware::{BrokerTransport, MemoryBroker};
//!
//! let broker = MemoryBroker::default();
//! let transport = broker.transport();
//! assert!(!transport.is_connected());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use envsim_types::{CONTROL_TOPIC, SimError};
use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{BrokerTransport, InboundMessage, receiver_stream};

/// Default channel capacity (messages buffered before slow subscribers
/// start lagging).
const DEFAULT_CAPACITY: usize = 256;

/// Shared in-process broker.  Clone it cheaply – all clones share the same
/// channel.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    sender: broadcast::Sender<InboundMessage>,
    available: Arc<AtomicBool>,
}

impl MemoryBroker {
    /// Create a broker whose channel buffers `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a new, unconnected transport attached to this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            inbound: broadcast::channel(DEFAULT_CAPACITY).0,
        }
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    ///
    /// While unavailable, `connect` fails with [`SimError::Connection`] and
    /// publishes are rejected.  Existing sessions are left in place.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Publish directly onto the broker, as an external client would.
    ///
    /// Returns the number of subscribers handed the message.  Zero
    /// subscribers is not an error: the message is simply dropped.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.sender
            .send(InboundMessage::new(topic, payload))
            .unwrap_or(0)
    }

    /// Watch every message published on exactly `topic`.
    pub fn watch(&self, topic: impl Into<String>) -> TopicWatcher {
        TopicWatcher {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Per-sensor transport
// ---------------------------------------------------------------------------

/// A [`BrokerTransport`] backed by a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: MemoryBroker,
    // Forwarding task; present while a session is live.
    session: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    inbound: broadcast::Sender<InboundMessage>,
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), SimError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        if !self.broker.is_available() {
            return Err(SimError::Connection("in-memory broker is unavailable".to_string()));
        }

        // Subscribe before spawning so nothing published after `connect`
        // returns can be missed.
        let mut receiver = self.broker.sender.subscribe();
        let inbound = self.inbound.clone();
        *session = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) if msg.topic == CONTROL_TOPIC => {
                        let _ = inbound.send(msg);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "memory transport lagged behind broker");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        self.connected.store(true, Ordering::SeqCst);
        debug!("memory transport connected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SimError> {
        if !self.is_connected() {
            return Err(SimError::NotConnected);
        }
        if !self.broker.is_available() {
            return Err(SimError::Publish {
                topic: topic.to_string(),
                details: "in-memory broker is unavailable".to_string(),
            });
        }
        self.broker.inject(topic, payload);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(task) = session.take() {
            task.abort();
            let _ = task.await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn messages(&self) -> BoxStream<'static, InboundMessage> {
        receiver_stream(self.inbound.subscribe())
    }
}

// ---------------------------------------------------------------------------
// Topic watcher
// ---------------------------------------------------------------------------

/// Receives every broker message whose topic equals the watched topic.
///
/// Obtained via [`MemoryBroker::watch`].
pub struct TopicWatcher {
    topic: String,
    receiver: broadcast::Receiver<InboundMessage>,
}

impl TopicWatcher {
    /// Wait for the next message on the watched topic.
    ///
    /// Returns `None` when the broker is closed.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if msg.topic == self.topic => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicWatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain whatever is already buffered for the watched topic without
    /// waiting.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(msg) if msg.topic == self.topic => out.push(msg),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return out,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn connect_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let transport = broker.transport();
        transport.connect().await?;
        transport.connect().await?;
        assert!(transport.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn connect_fails_when_broker_unavailable() {
        let broker = MemoryBroker::default();
        broker.set_available(false);
        let transport = broker.transport();
        let result = transport.connect().await;
        assert!(matches!(result, Err(SimError::Connection(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = MemoryBroker::default();
        let transport = broker.transport();
        let result = transport.publish("sensors/co2", b"{}".to_vec()).await;
        assert!(matches!(result, Err(SimError::NotConnected)));
    }

    #[tokio::test]
    async fn published_data_reaches_watcher() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let mut watcher = broker.watch("sensors/pressure");
        let transport = broker.transport();
        transport.connect().await?;

        transport.publish("sensors/co2", b"ignored".to_vec()).await?;
        transport.publish("sensors/pressure", b"reading".to_vec()).await?;

        let msg = watcher.recv().await.ok_or("no message")?;
        assert_eq!(msg.payload, b"reading");
        assert_eq!(watcher.topic(), "sensors/pressure");
        Ok(())
    }

    #[tokio::test]
    async fn only_control_topic_is_forwarded() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let transport = broker.transport();
        transport.connect().await?;
        let mut inbound = transport.messages();

        broker.inject("sensors/temperature", b"data".to_vec());
        broker.inject(CONTROL_TOPIC, b"control".to_vec());

        let msg = tokio::time::timeout(Duration::from_secs(1), inbound.next())
            .await?
            .ok_or("stream ended")?;
        assert_eq!(msg.topic, CONTROL_TOPIC);
        assert_eq!(msg.payload, b"control");
        Ok(())
    }

    #[tokio::test]
    async fn every_transport_receives_control_broadcast() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let a = broker.transport();
        let b = broker.transport();
        a.connect().await?;
        b.connect().await?;
        let mut rx_a = a.messages();
        let mut rx_b = b.messages();

        broker.inject(CONTROL_TOPIC, b"{\"command\":\"stop_all\"}".to_vec());

        let timeout = Duration::from_secs(1);
        assert!(tokio::time::timeout(timeout, rx_a.next()).await?.is_some());
        assert!(tokio::time::timeout(timeout, rx_b.next()).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_safe() {
        let broker = MemoryBroker::default();
        let transport = broker.transport();
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn disconnect_stops_forwarding() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let transport = broker.transport();
        transport.connect().await?;
        let mut inbound = transport.messages();
        transport.disconnect().await;

        broker.inject(CONTROL_TOPIC, b"late".to_vec());
        let result = tokio::time::timeout(Duration::from_millis(50), inbound.next()).await;
        assert!(result.is_err(), "disconnected transport must not forward control traffic");
        Ok(())
    }

    #[test]
    fn inject_without_subscribers_is_dropped() {
        let broker = MemoryBroker::default();
        assert_eq!(broker.inject(CONTROL_TOPIC, b"nobody".to_vec()), 0);
    }

    #[tokio::test]
    async fn drain_returns_buffered_messages() -> Result<(), Box<dyn std::error::Error>> {
        let broker = MemoryBroker::default();
        let mut watcher = broker.watch("sensors/co2");
        broker.inject("sensors/co2", b"1".to_vec());
        broker.inject("sensors/oxygen", b"x".to_vec());
        broker.inject("sensors/co2", b"2".to_vec());
        let drained = watcher.drain();
        assert_eq!(drained.len(), 2);
        assert!(watcher.drain().is_empty());
        Ok(())
    }
}
