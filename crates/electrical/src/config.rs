//! Parameter seeding for a simulation, loadable from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simcore::{MAX_CELLS, Result, SimError};

use crate::cell::{
    Cell, DEFAULT_CAPACITY_MAH, DEFAULT_INITIAL_VOLTAGE, DEFAULT_SERIES_RESISTANCE,
};

pub const DEFAULT_LOAD: f64 = 150.0;
pub const DEFAULT_RESOLUTION_MS: f64 = 100.0;
pub const DEFAULT_SPEED: f64 = 1.0;

/// Static parameters of one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    /// Initial (fully charged) voltage in V
    pub initial_voltage: f64,
    /// Internal series resistance in Ohms
    pub series_resistance: f64,
    /// Rated capacity in mAh
    pub capacity_mah: f64,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            initial_voltage: DEFAULT_INITIAL_VOLTAGE,
            series_resistance: DEFAULT_SERIES_RESISTANCE,
            capacity_mah: DEFAULT_CAPACITY_MAH,
        }
    }
}

impl CellConfig {
    pub fn new(initial_voltage: f64, series_resistance: f64) -> Self {
        Self { initial_voltage, series_resistance, ..Default::default() }
    }

    pub fn with_capacity(mut self, capacity_mah: f64) -> Self {
        self.capacity_mah = capacity_mah;
        self
    }

    pub fn build(&self) -> Result<Cell> {
        Cell::new(self.initial_voltage, self.series_resistance, self.capacity_mah)
    }
}

/// Everything needed to seed a pack and its simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// One entry per slot, in slot order (at most three)
    pub cells: Vec<CellConfig>,
    /// Load resistance in Ohms
    pub load_ohms: f64,
    /// Simulated time per tick in ms
    pub resolution_ms: f64,
    /// Wall-clock compression factor
    pub speed: f64,
    /// Append-only text log of every run, if wanted
    pub run_log: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cells: vec![
                CellConfig::new(12.5, 20.0),
                CellConfig::new(14.1, 30.0),
                CellConfig::new(12.9, 40.0),
            ],
            load_ohms: DEFAULT_LOAD,
            resolution_ms: DEFAULT_RESOLUTION_MS,
            speed: DEFAULT_SPEED,
            run_log: None,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SimError::InvalidParameter { name, value })
    }
}

impl SimulationConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cells.len() > MAX_CELLS {
            return Err(SimError::PackFull(self.cells.len()));
        }
        for cell in &self.cells {
            positive("initial voltage", cell.initial_voltage)?;
            positive("series resistance", cell.series_resistance)?;
            positive("capacity", cell.capacity_mah)?;
        }
        positive("load", self.load_ohms)?;
        positive("resolution", self.resolution_ms)?;
        positive("speed", self.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_pack() {
        let config = SimulationConfig::default();
        let voltages: Vec<f64> = config.cells.iter().map(|c| c.initial_voltage).collect();
        let resistances: Vec<f64> = config.cells.iter().map(|c| c.series_resistance).collect();
        assert_eq!(voltages, vec![12.5, 14.1, 12.9]);
        assert_eq!(resistances, vec![20.0, 30.0, 40.0]);
        assert!(config.cells.iter().all(|c| c.capacity_mah == 800.0));
        assert_eq!(config.load_ohms, 150.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{ "load_ohms": 10.0, "cells": [ { "initial_voltage": 11.0 } ] }"#,
        )
        .unwrap();
        assert_eq!(config.load_ohms, 10.0);
        assert_eq!(config.resolution_ms, DEFAULT_RESOLUTION_MS);
        assert_eq!(config.cells.len(), 1);
        assert_eq!(config.cells[0].initial_voltage, 11.0);
        assert_eq!(config.cells[0].series_resistance, DEFAULT_SERIES_RESISTANCE);
    }

    #[test]
    fn test_rejects_fourth_cell() {
        let mut config = SimulationConfig::default();
        config.cells.push(CellConfig::default());
        assert!(matches!(config.validate(), Err(SimError::PackFull(4))));
    }

    #[test]
    fn test_rejects_zero_load_and_bad_json() {
        assert!(matches!(
            SimulationConfig::from_json_str(r#"{ "load_ohms": 0.0 }"#),
            Err(SimError::InvalidParameter { name: "load", .. })
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("{ not json"),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_flat_cell() {
        let config = SimulationConfig {
            cells: vec![CellConfig::new(0.0, 20.0)],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimError::InvalidParameter { name: "initial voltage", .. })
        ));
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let config = SimulationConfig::default();
        let text = config.to_json_pretty().unwrap();
        assert_eq!(SimulationConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_build_cell() {
        let cell = CellConfig::new(14.1, 30.0).with_capacity(2600.0).build().unwrap();
        assert_eq!(cell.initial_voltage(), 14.1);
        assert_eq!(cell.series_resistance(), 30.0);
        assert!((cell.capacity() - 2600.0).abs() < 1e-9);
    }
}
