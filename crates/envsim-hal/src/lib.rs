//! `envsim-hal` – the simulated hardware.
//!
//! # Modules
//!
//! - [`signal`] – the Signal Generator: a pure function from sensor kind and
//!   elapsed time to a plausible physical reading.
//! - [`sensor`] – [`Sensor`], the per-sensor lifecycle state machine that
//!   runs the publish loop and reacts to control messages.

pub mod sensor;
pub mod signal;

pub use sensor::{Dispatch, Sensor, SensorState};
pub use signal::{SignalProfile, Waveform, sample};
