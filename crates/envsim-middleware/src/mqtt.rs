//! MQTT adapter built on `rumqttc`.
//!
//! [`MqttTransport`] owns one logical broker session.  `connect` performs the
//! CONNECT/CONNACK handshake under a timeout, subscribes to
//! [`CONTROL_TOPIC`] and hands the `rumqttc` event loop to a background task
//! that:
//!
//! * forwards every inbound PUBLISH to the transport's message streams,
//! * keeps polling after network errors so `rumqttc` reconnects on its own,
//! * re-subscribes to the control topic on every fresh CONNACK.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use envsim_types::{CONTROL_TOPIC, SimError};
use futures_util::stream::BoxStream;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{BrokerTransport, InboundMessage, receiver_stream};

/// Outstanding requests `rumqttc` buffers between client and event loop.
const REQUEST_CAPACITY: usize = 64;

/// Pause between event-loop polls after a network error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How long `disconnect` lets the event loop flush the DISCONNECT packet.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

const INBOUND_CAPACITY: usize = 64;

/// Delivery guarantee requested for publishes and the control subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryQos {
    /// QoS 0, fire-and-forget.
    #[default]
    AtMostOnce,
    /// QoS 1.
    AtLeastOnce,
    /// QoS 2.
    ExactlyOnce,
}

impl DeliveryQos {
    /// Map an MQTT QoS level (`0`, `1` or `2`).
    pub fn from_level(level: u8) -> Result<Self, SimError> {
        match level {
            0 => Ok(DeliveryQos::AtMostOnce),
            1 => Ok(DeliveryQos::AtLeastOnce),
            2 => Ok(DeliveryQos::ExactlyOnce),
            other => Err(SimError::InvalidConfig(format!(
                "MQTT QoS must be 0, 1 or 2, got {other}"
            ))),
        }
    }

    fn as_rumqttc(self) -> QoS {
        match self {
            DeliveryQos::AtMostOnce => QoS::AtMostOnce,
            DeliveryQos::AtLeastOnce => QoS::AtLeastOnce,
            DeliveryQos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Connection parameters for one [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub qos: DeliveryQos,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            qos: DeliveryQos::default(),
        }
    }

    /// Build a client id that is unique per process run, e.g.
    /// `envsim-sensor-3-1f2e3d4c`.
    pub fn unique_client_id(prefix: &str, role: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{prefix}-{role}-{}", &suffix[..8])
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_qos(mut self, qos: DeliveryQos) -> Self {
        self.qos = qos;
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Session {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

/// A [`BrokerTransport`] speaking MQTT 3.1.1 to a real broker.
pub struct MqttTransport {
    settings: MqttSettings,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    inbound: broadcast::Sender<InboundMessage>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            inbound: broadcast::channel(INBOUND_CAPACITY).0,
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    async fn client(&self) -> Option<AsyncClient> {
        self.session.lock().await.as_ref().map(|s| s.client.clone())
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&self) -> Result<(), SimError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(SimError::Connection(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(self.settings.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(broker = %self.settings.broker_addr(), error = %e, "MQTT connect failed");
                return Err(e);
            }
            Err(_) => {
                warn!(broker = %self.settings.broker_addr(), "MQTT connect timed out");
                return Err(SimError::Connection(format!(
                    "no CONNACK from {} within {:?}",
                    self.settings.broker_addr(),
                    self.settings.connect_timeout
                )));
            }
        }

        let qos = self.settings.qos.as_rumqttc();
        client
            .subscribe(CONTROL_TOPIC, qos)
            .await
            .map_err(|e| SimError::Connection(format!("subscribe to {CONTROL_TOPIC} failed: {e}")))?;

        let inbound = self.inbound.clone();
        let connected = Arc::clone(&self.connected);
        let resubscriber = client.clone();
        let client_id = self.settings.client_id.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = inbound.send(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::SeqCst);
                        info!(%client_id, "reconnected to MQTT broker");
                        if let Err(e) = resubscriber.try_subscribe(CONTROL_TOPIC, qos) {
                            warn!(%client_id, error = %e, "control re-subscribe failed");
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!(%client_id, "DISCONNECT sent; event loop exiting");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!(%client_id, error = %e, "MQTT event loop error; retrying");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        });

        self.connected.store(true, Ordering::SeqCst);
        info!(
            broker = %self.settings.broker_addr(),
            client_id = %self.settings.client_id,
            "connected to MQTT broker"
        );
        *session = Some(Session { client, event_loop });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SimError> {
        let client = self.client().await.ok_or(SimError::NotConnected)?;
        // `try_publish` fails instead of waiting when the request queue is
        // full, which happens while the event loop cannot reach the broker.
        client
            .try_publish(topic, self.settings.qos.as_rumqttc(), false, payload)
            .map_err(|e| SimError::Publish {
                topic: topic.to_string(),
                details: e.to_string(),
            })
    }

    async fn disconnect(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        match session.client.try_disconnect() {
            Ok(()) => {
                if tokio::time::timeout(DISCONNECT_GRACE, &mut session.event_loop)
                    .await
                    .is_err()
                {
                    session.event_loop.abort();
                }
            }
            Err(e) => {
                debug!(error = %e, "DISCONNECT request could not be queued");
                session.event_loop.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(client_id = %self.settings.client_id, "disconnected from MQTT broker");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn messages(&self) -> BoxStream<'static, InboundMessage> {
        receiver_stream(self.inbound.subscribe())
    }
}
