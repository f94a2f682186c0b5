//! Battery pack discharge engine
//!
//! This crate provides:
//! - A cell model with a linear discharge curve
//! - A pack that selects and discharges up to three cells on a worker thread
//! - A simulation facade holding the load and timing settings
//! - JSON configuration and an append-only text run log

pub mod cell;
pub mod config;
pub mod pack;
pub mod run_log;
pub mod simulation;

pub use cell::*;
pub use config::*;
pub use pack::*;
pub use run_log::*;
pub use simulation::*;
