//! Shared vocabulary for the battery pack simulator.
//!
//! - `error`: the error taxonomy returned by every fallible operation
//! - `run_state`: the run lifecycle primitive shared by a pack and its worker
//! - `traits`: telemetry snapshots and the observer/model traits

pub mod error;
pub mod run_state;
pub mod traits;

pub use error::*;
pub use run_state::*;
pub use traits::*;
