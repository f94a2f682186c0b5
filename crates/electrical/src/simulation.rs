//! Operator-facing facade over a pack: holds the load and timing settings
//! and forwards the lifecycle calls.

use std::sync::Arc;

use log::info;
use simcore::{Model, Result, SimError};

use crate::cell::Cell;
use crate::config::{DEFAULT_LOAD, DEFAULT_RESOLUTION_MS, DEFAULT_SPEED, SimulationConfig};
use crate::pack::Pack;
use crate::run_log::RunLog;

#[derive(Debug)]
pub struct Simulation {
    load: f64,
    resolution: f64,
    speed: f64,
    pack: Option<Arc<Pack>>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(SimError::InvalidParameter { name, value })
    }
}

impl Simulation {
    pub fn new() -> Self {
        Simulation {
            load: DEFAULT_LOAD,
            resolution: DEFAULT_RESOLUTION_MS,
            speed: DEFAULT_SPEED,
            pack: None,
        }
    }

    /// Builds the cells, the pack and the facade described by `config`.
    ///
    /// The returned cells are the caller's; the pack only borrows them
    /// while running.
    pub fn from_config(config: &SimulationConfig) -> Result<(Self, Vec<Arc<Cell>>)> {
        config.validate()?;
        let pack = Arc::new(Pack::new());
        let cells = config
            .cells
            .iter()
            .map(|c| c.build().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        for cell in &cells {
            pack.add_cell(cell)?;
        }
        if let Some(path) = &config.run_log {
            pack.set_observer(Some(Arc::new(RunLog::open(path)?)))?;
        }

        let mut simulation = Simulation::new();
        simulation.load = config.load_ohms;
        simulation.resolution = config.resolution_ms;
        simulation.speed = config.speed;
        simulation.pack = Some(pack);
        Ok((simulation, cells))
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.pack {
            Some(pack) if pack.is_running() => Err(SimError::PackRunning),
            _ => Ok(()),
        }
    }

    fn connected(&self) -> Result<&Arc<Pack>> {
        self.pack.as_ref().ok_or(SimError::NotConnected)
    }

    /// Connects a pack, replacing the current one if it is idle.
    pub fn connect(&mut self, pack: Arc<Pack>) -> Result<()> {
        self.ensure_idle()?;
        self.pack = Some(pack);
        Ok(())
    }

    pub fn pack(&self) -> Option<&Arc<Pack>> {
        self.pack.as_ref()
    }

    pub fn set_load(&mut self, ohms: f64) -> Result<()> {
        self.ensure_idle()?;
        self.load = positive("load", ohms)?;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        self.ensure_idle()?;
        self.speed = positive("speed", speed)?;
        Ok(())
    }

    /// Sets the simulated time per tick in ms.
    pub fn set_resolution(&mut self, ms: f64) -> Result<()> {
        self.ensure_idle()?;
        self.resolution = positive("resolution", ms)?;
        Ok(())
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn is_running(&self) -> bool {
        self.pack.as_ref().is_some_and(|pack| pack.is_running())
    }

    pub fn start(&self) -> Result<()> {
        let pack = self.connected()?;
        pack.start(self.load, self.resolution, self.speed)?;
        info!(
            "simulation started: load {} ohm, resolution {} ms, speed x{}",
            self.load, self.resolution, self.speed
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.connected()?.stop()?;
        info!("simulation stopped");
        Ok(())
    }

    /// Stops without resetting, so a later `resume` carries on from the
    /// accumulated elapsed time.
    pub fn pause(&self) -> Result<()> {
        self.connected()?.stop()
    }

    pub fn resume(&self) -> Result<()> {
        self.start()
    }
}

impl Model for Simulation {
    /// Zeroes the pack telemetry and recharges every cell.
    fn reset(&self) -> Result<()> {
        let pack = self.connected()?;
        pack.reset()?;
        for slot in 0..pack.cell_count() {
            if let Some(cell) = pack.cell(slot) {
                cell.reset()?;
            }
        }
        Ok(())
    }
}
