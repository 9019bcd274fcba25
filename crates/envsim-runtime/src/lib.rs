//! `envsim-runtime` – fleet orchestration and process-wide plumbing.
//!
//! # Modules
//!
//! - [`ids`] – [`IdAllocator`][ids::IdAllocator]: hands out sensor ids.  One
//!   allocator lives for the whole process and is passed explicitly to every
//!   [`Fleet`][fleet::Fleet] that is built.
//! - [`fleet`] – [`Fleet`][fleet::Fleet]: builds `N` sensors of every kind and
//!   drives their collective lifecycle (connect, start, stop, shutdown).
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod fleet;
pub mod ids;
pub mod telemetry;

pub use fleet::{Fleet, FleetConfig};
pub use ids::IdAllocator;
pub use telemetry::{TracerProviderGuard, init_tracing};
