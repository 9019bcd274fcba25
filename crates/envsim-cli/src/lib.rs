//! `envsim-cli` – configuration and operator front-ends shared by the
//! `envsim` and `envsim-ctl` binaries.

pub mod config;
pub mod console;
pub mod ctl;
