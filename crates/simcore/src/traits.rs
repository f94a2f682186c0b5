use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Number of cell slots in a pack.
pub const MAX_CELLS: usize = 3;

/// Everything a reader can learn about one cell, taken under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub initial_voltage: f64,
    pub series_resistance: f64,
    /// Rated capacity in mAh.
    pub capacity_mah: f64,
    pub current_voltage: f64,
    /// Charge drawn since the last attach, in A·ms.
    pub discharged_capacity: f64,
    /// May drop below zero on an over-discharged cell.
    pub remaining_capacity_percent: f64,
    pub sourced_current: f64,
    pub attached: bool,
}

/// Pack telemetry as published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackState {
    pub output_voltage: f64,
    /// Output current in A.
    pub output_current: f64,
    pub elapsed_ms: f64,
    pub cutoff_voltage: f64,
    pub switches: [bool; MAX_CELLS],
    pub running: bool,
}

impl Default for PackState {
    fn default() -> Self {
        PackState {
            output_voltage: 0.0,
            output_current: 0.0,
            elapsed_ms: 0.0,
            cutoff_voltage: 8.0,
            switches: [false; MAX_CELLS],
            running: false,
        }
    }
}

/// Receives run events from a pack worker.
///
/// Callbacks run on the worker thread between ticks, so a slow observer
/// delays the next tick.
pub trait PackObserver: Send + Sync {
    fn on_start(&self, _pack: &PackState) {}
    fn on_tick(&self, _pack: &PackState, _cells: &[CellState]) {}
    fn on_exhausted(&self, _pack: &PackState) {}
    fn on_stop(&self, _pack: &PackState) {}
}

pub trait Model {
    /// Returns the model to its rest state. Rejected while a run owns it.
    fn reset(&self) -> Result<()>;
}
