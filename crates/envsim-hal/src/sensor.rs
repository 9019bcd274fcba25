//! [`Sensor`] – the per-sensor lifecycle state machine.
//!
//! ```text
//!            connect()              start()
//!   Idle ───────────────► ConnectedIdle ◄──────► Running
//!     │                        │        stop()      │
//!     └────────────────────────┴──── shutdown() ────┴──► Stopped
//! ```
//!
//! A sensor runs two concurrent activities once connected:
//!
//! * the **publish loop** (only while running) – samples the signal
//!   generator, publishes a reading, sleeps a random interval drawn from its
//!   [`SleepBounds`], and re-checks the `running` flag;
//! * the **control listener** – consumes the transport's inbound stream and
//!   dispatches each control message in arrival order.
//!
//! `start`, `stop` and `shutdown` serialise on one per-sensor lock, so two
//! near-simultaneous `start` commands can never launch two loops.  `stop`
//! clears the flag, wakes the loop if it is sleeping, and joins it before
//! returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use envsim_middleware::{BrokerTransport, codec};
use envsim_types::{
    Command, ControlMessage, SensorIdentity, SensorKind, SimError, SleepBounds,
};
use futures_util::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::signal;

/// Observable lifecycle state of a [`Sensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    /// Constructed, never connected.
    Idle,
    /// Transport live and subscribed; publish loop not running.
    ConnectedIdle,
    /// Publish loop active.
    Running,
    /// Torn down.  Terminal.
    Stopped,
}

/// What a control message did to a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    Started,
    Stopped,
    /// A reading with this value was published.
    Injected(f64),
    /// The message was not addressed to this sensor or carried nothing
    /// actionable.
    Ignored,
    /// The payload could not be decoded.
    Rejected,
    /// The command was addressed to this sensor but could not be carried out.
    Failed,
}

struct Inner {
    identity: SensorIdentity,
    transport: Arc<dyn BrokerTransport>,
    bounds: SleepBounds,
    running: AtomicBool,
    connected: AtomicBool,
    terminated: AtomicBool,
    // Wakes a sleeping publish loop when `running` is cleared.
    wake: Notify,
    // Zero point of the signal generator's time axis.
    epoch: Instant,
    // Held while launching or joining the publish loop.
    publish_task: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    async fn publish_reading(&self, value: f64) -> Result<(), SimError> {
        let payload = codec::encode_data(&self.identity, value, Utc::now());
        let topic = self.identity.topic();
        self.transport.publish(topic, payload).await?;
        info!(
            sensor_id = self.identity.id,
            kind = %self.identity.kind,
            topic,
            value,
            "published reading"
        );
        Ok(())
    }
}

/// A simulated environmental sensor.
///
/// Cloning is cheap and every clone drives the same sensor.  Call
/// [`shutdown`][Self::shutdown] to release the broker session; dropping the
/// last handle does not.
#[derive(Clone)]
pub struct Sensor {
    inner: Arc<Inner>,
}

impl Sensor {
    pub fn new(
        identity: SensorIdentity,
        transport: Arc<dyn BrokerTransport>,
        bounds: SleepBounds,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                transport,
                bounds,
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                wake: Notify::new(),
                epoch: Instant::now(),
                publish_task: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.identity.id
    }

    pub fn kind(&self) -> SensorKind {
        self.inner.identity.kind
    }

    /// Stable display name, e.g. `"PRESSURE no.: 2"`.
    pub fn name(&self) -> String {
        self.inner.identity.name()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SensorState {
        if self.inner.terminated.load(Ordering::SeqCst) {
            SensorState::Stopped
        } else if self.inner.running.load(Ordering::SeqCst) {
            SensorState::Running
        } else if self.inner.connected.load(Ordering::SeqCst) {
            SensorState::ConnectedIdle
        } else {
            SensorState::Idle
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────

    /// Connect the transport and start the control listener.
    ///
    /// A no-op when already connected.  Failure leaves the sensor in its
    /// current state and is logged.
    // Return type spelled out with `+ Send` to break the recursive auto-trait
    // cycle (connect -> listener -> handle_payload -> start -> connect).
    pub fn connect(&self) -> impl std::future::Future<Output = Result<(), SimError>> + Send + '_ {
        async move {
            if self.inner.terminated.load(Ordering::SeqCst) {
                return Err(SimError::Terminated(self.id()));
            }

            let mut listener = self.inner.listener.lock().await;
            // Subscribe before connecting so no control message that arrives
            // right after the broker's SUBACK slips past the listener.
            let inbound = listener
                .as_ref()
                .is_none_or(|task| task.is_finished())
                .then(|| self.inner.transport.messages());

            if let Err(e) = self.inner.transport.connect().await {
                warn!(sensor_id = self.id(), error = %e, "sensor failed to connect to broker");
                return Err(e);
            }
            self.inner.connected.store(true, Ordering::SeqCst);

            if let Some(mut stream) = inbound {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                *listener = Some(tokio::spawn(async move {
                    while let Some(msg) = stream.next().await {
                        let Some(inner) = weak.upgrade() else { break };
                        Sensor { inner }.handle_payload(&msg.payload).await;
                    }
                }));
                info!(sensor_id = self.id(), name = %self.name(), "sensor connected");
            }
            Ok(())
        }
    }

    /// Launch the publish loop.
    ///
    /// A no-op when already running.  Connects first when needed; if that
    /// fails the sensor stays where it was and the error is returned.
    pub async fn start(&self) -> Result<(), SimError> {
        let mut task = self.inner.publish_task.lock().await;
        if self.inner.terminated.load(Ordering::SeqCst) {
            return Err(SimError::Terminated(self.id()));
        }
        if self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            if let Err(e) = self.connect().await {
                warn!(sensor_id = self.id(), "cannot start sensor: broker connection failed");
                return Err(e);
            }
        }

        self.inner.running.store(true, Ordering::SeqCst);
        *task = Some(tokio::spawn(publish_loop(Arc::clone(&self.inner))));
        info!(sensor_id = self.id(), name = %self.name(), "sensor started");
        Ok(())
    }

    /// Stop the publish loop and wait for it to exit.
    ///
    /// A no-op when not running.  At most one reading already in flight may
    /// still be published before this returns; none is published after.
    pub async fn stop(&self) {
        let mut task = self.inner.publish_task.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.wake.notify_waiters();
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(sensor_id = self.id(), error = %e, "publish loop terminated abnormally");
            }
        }
        info!(sensor_id = self.id(), name = %self.name(), "sensor stopped");
    }

    /// Publish one reading carrying `value`, bypassing the signal generator.
    ///
    /// Works whether or not the publish loop is running and leaves
    /// `running` untouched.  Requires a connected transport.
    pub async fn generate_value(&self, value: f64) -> Result<(), SimError> {
        if self.inner.terminated.load(Ordering::SeqCst) {
            return Err(SimError::Terminated(self.id()));
        }
        if !value.is_finite() {
            return Err(SimError::InvalidValue(value));
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(SimError::NotConnected);
        }
        self.inner.publish_reading(value).await.inspect_err(|e| {
            warn!(sensor_id = self.id(), error = %e, "injected reading was not published");
        })
    }

    /// Stop the loop, end the control listener and close the broker session.
    ///
    /// Terminal: afterwards `connect`, `start` and `generate_value` are
    /// refused.  Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop().await;
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.abort();
            let _ = listener.await;
        }
        self.inner.transport.disconnect().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        info!(sensor_id = self.id(), name = %self.name(), "sensor shut down");
    }

    // ────────────────────────────────────────────────────────────────────
    // Control dispatch
    // ────────────────────────────────────────────────────────────────────

    /// Decode a raw control payload and dispatch it.
    ///
    /// Malformed payloads are logged once and dropped.
    pub async fn handle_payload(&self, payload: &[u8]) -> Dispatch {
        match codec::decode_control(payload) {
            Ok(msg) => self.dispatch(&msg).await,
            Err(e) => {
                warn!(sensor_id = self.id(), error = %e, "dropping malformed control message");
                Dispatch::Rejected
            }
        }
    }

    /// Apply a decoded control message to this sensor.
    ///
    /// * Addressed to this id: `start`, `stop`, or – for any other command,
    ///   including none – inject `value` when present.
    /// * No id: `start_all` and `stop_all`.
    /// * Everything else is ignored.
    pub async fn dispatch(&self, msg: &ControlMessage) -> Dispatch {
        match msg.sensor_id {
            Some(target) if target == self.id() => match (&msg.command, msg.value) {
                (Some(Command::Start), _) => {
                    info!(sensor_id = self.id(), "start requested over control topic");
                    self.start_outcome().await
                }
                (Some(Command::Stop), _) => {
                    info!(sensor_id = self.id(), "stop requested over control topic");
                    self.stop().await;
                    Dispatch::Stopped
                }
                (_, Some(value)) => {
                    info!(sensor_id = self.id(), value, "value injected over control topic");
                    match self.generate_value(value).await {
                        Ok(()) => Dispatch::Injected(value),
                        Err(_) => Dispatch::Failed,
                    }
                }
                _ => Dispatch::Ignored,
            },
            Some(_) => Dispatch::Ignored,
            None => match msg.command {
                Some(Command::StartAll) => self.start_outcome().await,
                Some(Command::StopAll) => {
                    self.stop().await;
                    Dispatch::Stopped
                }
                _ => Dispatch::Ignored,
            },
        }
    }

    async fn start_outcome(&self) -> Dispatch {
        match self.start().await {
            Ok(()) => Dispatch::Started,
            Err(_) => Dispatch::Failed,
        }
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Body of the publish loop.  Runs until `running` is cleared.
async fn publish_loop(inner: Arc<Inner>) {
    let mut rng = StdRng::from_entropy();
    while inner.running.load(Ordering::SeqCst) {
        let elapsed = inner.epoch.elapsed().as_secs_f64();
        let value = signal::sample(inner.identity.kind, elapsed, &mut rng);
        if let Err(e) = inner.publish_reading(value).await {
            warn!(sensor_id = inner.identity.id, error = %e, "publish failed; will retry next cycle");
        }

        let delay = inner.bounds.draw(&mut rng);
        let woken = inner.wake.notified();
        tokio::pin!(woken);
        // Register before re-checking the flag so a concurrent `stop` cannot
        // slip its wake-up in between.
        woken.as_mut().enable();
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut woken => {}
        }
    }
}
