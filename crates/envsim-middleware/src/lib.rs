//! `envsim-middleware` – broker plumbing for the sensor fleet.
//!
//! Moves bytes between sensors and the outside world without caring what
//! they mean.
//!
//! # Modules
//!
//! - [`transport`] – the [`BrokerTransport`] trait every broker adapter
//!   implements.
//! - [`mqtt`] – [`MqttTransport`], the production adapter built on `rumqttc`.
//! - [`bus`] – [`MemoryBroker`], an in-process broker on Tokio broadcast
//!   channels for headless tests and offline runs.
//! - [`codec`] – JSON encoding of data messages and decoding of control
//!   messages.

pub mod bus;
pub mod codec;
pub mod mqtt;
pub mod transport;

pub use bus::{MemoryBroker, MemoryTransport, TopicWatcher};
pub use codec::{decode_control, decode_data, encode_control, encode_data};
pub use mqtt::{DeliveryQos, MqttSettings, MqttTransport};
pub use transport::{BrokerTransport, InboundMessage};
