//! The Broker Transport Adapter contract.
//!
//! A sensor never talks to MQTT directly.  It owns one [`BrokerTransport`]
//! and goes through it for connecting, publishing and receiving control
//! traffic.
//!
//! # Contract
//!
//! * `connect` – idempotent.  Establishes a session, starts the adapter's
//!   own network loop and subscribes to
//!   [`CONTROL_TOPIC`][envsim_types::CONTROL_TOPIC].  Failures come back as
//!   [`SimError::Connection`]; they never panic.
//! * `publish` – fire-and-forget.  No broker acknowledgement is awaited.
//! * `disconnect` – stops the network loop and closes the session.  Safe to
//!   call when never connected.
//! * `messages` – a live stream of every message arriving on the subscribed
//!   control topic.  This is how a sensor registers its arrival handler.

use async_trait::async_trait;
use envsim_types::SimError;
use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Every broker adapter must implement this trait.
///
/// Implementations are shared between a sensor's publish loop and its
/// control listener, so every method takes `&self` and must be safe to call
/// concurrently.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Connect and subscribe to the control topic.  Returns immediately when
    /// already connected.
    async fn connect(&self) -> Result<(), SimError>;

    /// Send `payload` on `topic` without waiting for delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SimError>;

    /// Tear the session down.  Never fails.
    async fn disconnect(&self);

    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    /// Stream of inbound control-topic messages.
    ///
    /// Each call returns an independent stream; a message is delivered to
    /// every stream that exists when it arrives.
    fn messages(&self) -> BoxStream<'static, InboundMessage>;
}

/// Adapt a broadcast receiver into the stream shape returned by
/// [`BrokerTransport::messages`].
///
/// A lagging receiver logs and skips ahead; the stream ends once every
/// sender is gone.
pub(crate) fn receiver_stream(
    receiver: broadcast::Receiver<InboundMessage>,
) -> BoxStream<'static, InboundMessage> {
    Box::pin(stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((msg, rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "inbound control stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}
