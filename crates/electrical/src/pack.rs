//! Battery pack of up to three parallel cells behind individual switches.
//!
//! Each tick the worker ranks the cells by voltage, closes the switch of
//! every cell within the tolerance band of the highest one, shares the
//! load current between those cells and advances their discharge state.
//! The run ends when stopped from outside or when the output voltage falls
//! below the cutoff.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use simcore::{
    CellState, MAX_CELLS, Model, PackObserver, PackState, Result, RunControl, SimError,
};

use crate::cell::{Cell, PackId};

pub const CUTOFF_VOLTAGE: f64 = 8.0;
pub const TOLERANCE_BAND: f64 = 0.005;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the selection step needs to know about one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellReading {
    pub voltage: f64,
    pub series_resistance: f64,
}

/// Outcome of the selection and distribution steps of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPlan {
    pub active: [bool; MAX_CELLS],
    pub output_voltage: f64,
    pub output_current: f64,
    pub sourced_currents: [f64; MAX_CELLS],
}

/// Selects the active cells and splits the load current between them.
///
/// Cells are ranked by voltage, highest first, with ties kept in slot
/// order. The top cell is always active; every other cell joins when it is
/// within `tolerance` of the top cell (not of its neighbour in the ranking).
/// The output voltage is that of the lowest-ranked active cell.
pub fn plan_tick(readings: &[CellReading], load: f64, tolerance: f64) -> TickPlan {
    let mut plan = TickPlan {
        active: [false; MAX_CELLS],
        output_voltage: 0.0,
        output_current: 0.0,
        sourced_currents: [0.0; MAX_CELLS],
    };
    let readings = &readings[..readings.len().min(MAX_CELLS)];

    let mut ranked: Vec<usize> = (0..readings.len()).collect();
    ranked.sort_by(|&a, &b| readings[b].voltage.total_cmp(&readings[a].voltage));
    let Some((&top, rest)) = ranked.split_first() else {
        return plan;
    };

    let highest = readings[top].voltage;
    plan.active[top] = true;
    plan.output_voltage = highest;
    for &slot in rest {
        if highest - readings[slot].voltage <= tolerance {
            plan.active[slot] = true;
            plan.output_voltage = readings[slot].voltage;
        }
    }

    let ratio: f64 = readings
        .iter()
        .zip(plan.active.iter())
        .filter(|(_, active)| **active)
        .map(|(r, _)| r.voltage / r.series_resistance)
        .sum();

    plan.output_current = plan.output_voltage / load;
    if ratio <= 0.0 {
        // flat cells have nothing to share out
        return plan;
    }
    for (slot, reading) in readings.iter().enumerate() {
        if plan.active[slot] {
            plan.sourced_currents[slot] =
                plan.output_current * reading.voltage / (ratio * reading.series_resistance);
        }
    }
    plan
}

#[derive(Debug, Clone, Copy)]
struct RunParams {
    load: f64,
    tick_period: f64,
    speed: f64,
}

impl RunParams {
    fn validate(load: f64, tick_period: f64, speed: f64) -> Result<Self> {
        if load == 0.0 {
            return Err(SimError::ZeroLoad);
        }
        if tick_period == 0.0 {
            return Err(SimError::ZeroTickPeriod);
        }
        if speed == 0.0 {
            return Err(SimError::ZeroSpeed);
        }
        for (name, value) in [("load", load), ("tick period", tick_period), ("speed", speed)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SimError::InvalidParameter { name, value });
            }
        }
        Ok(RunParams { load, tick_period, speed })
    }

    fn sleep_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.tick_period / self.speed / 1000.0)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PackOutput {
    output_voltage: f64,
    output_current: f64,
    elapsed_ms: f64,
    switches: [bool; MAX_CELLS],
}

#[derive(Debug)]
struct PackShared {
    id: PackId,
    run: RunControl,
    output: Mutex<PackOutput>,
    cutoff_voltage: f64,
    tolerance: f64,
    /// Number of runs that have ended, bumped together with the run state.
    exits: Mutex<u64>,
    exited: Condvar,
}

impl PackShared {
    /// Returns the run to rest and wakes everyone blocked in `wait_for_exit`.
    fn end_run(&self, aborted: bool) {
        let mut exits = lock(&self.exits);
        if aborted {
            self.run.abort();
        } else {
            self.run.finish();
        }
        *exits += 1;
        self.exited.notify_all();
    }

    /// Blocks until the run in progress, if any, has ended.
    fn wait_for_exit(&self) {
        let mut exits = lock(&self.exits);
        let seen = *exits;
        while self.run.is_running() && *exits == seen {
            exits = self.exited.wait(exits).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn snapshot(&self) -> PackState {
        let output = *lock(&self.output);
        PackState {
            output_voltage: output.output_voltage,
            output_current: output.output_current,
            elapsed_ms: output.elapsed_ms,
            cutoff_voltage: self.cutoff_voltage,
            switches: output.switches,
            running: self.run.is_running(),
        }
    }
}

/// Cells held by a worker for the length of a run.
///
/// Dropping the lease hands the cells back and marks the run stopped, so
/// the pack returns to rest even if the worker unwinds.
struct Lease {
    shared: Arc<PackShared>,
    cells: Vec<Arc<Cell>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        for cell in &self.cells {
            if let Err(e) = cell.detach(self.shared.id) {
                warn!("failed to release cell: {e}");
            }
        }
        self.shared.end_run(false);
    }
}

pub struct Pack {
    shared: Arc<PackShared>,
    cells: Mutex<Vec<Weak<Cell>>>,
    observer: Mutex<Option<Arc<dyn PackObserver>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Pack {
    fn default() -> Self {
        Self::new()
    }
}

impl Pack {
    pub fn new() -> Self {
        Pack {
            shared: Arc::new(PackShared {
                id: PackId::next(),
                run: RunControl::new(),
                output: Mutex::new(PackOutput::default()),
                cutoff_voltage: CUTOFF_VOLTAGE,
                tolerance: TOLERANCE_BAND,
                exits: Mutex::new(0),
                exited: Condvar::new(),
            }),
            cells: Mutex::new(Vec::with_capacity(MAX_CELLS)),
            observer: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> PackId {
        self.shared.id
    }

    /// Appends a cell to the next free slot and returns the slot index.
    pub fn add_cell(&self, cell: &Arc<Cell>) -> Result<usize> {
        let mut slots = lock(&self.cells);
        if self.is_running() {
            return Err(SimError::PackRunning);
        }
        if slots.len() >= MAX_CELLS {
            return Err(SimError::PackFull(slots.len()));
        }
        slots.push(Arc::downgrade(cell));
        Ok(slots.len() - 1)
    }

    pub fn cell_count(&self) -> usize {
        lock(&self.cells).len()
    }

    /// The cell in `slot`, if it is still alive.
    pub fn cell(&self, slot: usize) -> Option<Arc<Cell>> {
        lock(&self.cells).get(slot).and_then(Weak::upgrade)
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn PackObserver>>) -> Result<()> {
        if self.is_running() {
            return Err(SimError::PackRunning);
        }
        *lock(&self.observer) = observer;
        Ok(())
    }

    /// Starts a run on a worker thread.
    ///
    /// `tick_period` is the simulated time per tick in ms; the worker sleeps
    /// `tick_period / speed` of wall-clock time between ticks.
    pub fn start(&self, load: f64, tick_period: f64, speed: f64) -> Result<()> {
        let params = RunParams::validate(load, tick_period, speed)?;

        let mut worker = lock(&self.worker);
        if !self.shared.run.try_begin() {
            return Err(SimError::PackRunning);
        }
        if let Some(previous) = worker.take() {
            // already finished; it only needs reaping
            if previous.join().is_err() {
                error!("previous pack worker panicked");
            }
        }

        let cells = match self.lend_cells() {
            Ok(cells) => cells,
            Err(e) => {
                self.shared.end_run(true);
                return Err(e);
            }
        };
        let lease = Lease {
            shared: Arc::clone(&self.shared),
            cells,
        };
        let observer = lock(&self.observer).clone();

        let handle = thread::Builder::new()
            .name("pack-worker".into())
            .spawn(move || run_worker(lease, params, observer))
            .map_err(SimError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }

    fn lend_cells(&self) -> Result<Vec<Arc<Cell>>> {
        let slots = lock(&self.cells);
        if slots.is_empty() {
            return Err(SimError::NoCells);
        }

        let mut lent: Vec<Arc<Cell>> = Vec::with_capacity(slots.len());
        let attached: Result<()> = slots.iter().try_for_each(|slot| {
            let cell = slot.upgrade().ok_or(SimError::CellDropped)?;
            cell.attach(self.shared.id)?;
            lent.push(cell);
            Ok(())
        });
        if let Err(e) = attached {
            for cell in &lent {
                if let Err(e) = cell.detach(self.shared.id) {
                    warn!("failed to roll back cell attachment: {e}");
                }
            }
            return Err(e);
        }
        Ok(lent)
    }

    /// Asks the worker to stop and waits for it to exit. Blocks for up to
    /// one tick.
    pub fn stop(&self) -> Result<()> {
        // request and take under the worker lock so both refer to one run
        let handle = {
            let mut worker = lock(&self.worker);
            if !self.shared.run.request_stop() {
                return Err(SimError::NotRunning);
            }
            worker.take()
        };
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("pack worker panicked");
                }
            }
            None => self.shared.wait_for_exit(),
        }
        Ok(())
    }

    /// Waits for the current run to end on its own. Returns `NotRunning` if
    /// the pack was never started or its last run has already been stopped.
    ///
    /// The worker handle stays with the pack, so `start` keeps failing with
    /// `PackRunning` until the run is over.
    pub fn wait(&self) -> Result<()> {
        if lock(&self.worker).is_none() {
            return Err(SimError::NotRunning);
        }
        self.shared.wait_for_exit();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.is_running()
    }

    pub fn output_voltage(&self) -> f64 {
        lock(&self.shared.output).output_voltage
    }

    /// Output current in A.
    pub fn output_current(&self) -> f64 {
        lock(&self.shared.output).output_current
    }

    /// Simulated time run so far, in ms.
    pub fn elapsed_time(&self) -> f64 {
        lock(&self.shared.output).elapsed_ms
    }

    pub fn cutoff_voltage(&self) -> f64 {
        self.shared.cutoff_voltage
    }

    pub fn switch_status(&self, slot: usize) -> Result<bool> {
        if slot >= MAX_CELLS {
            return Err(SimError::SlotOutOfRange(slot));
        }
        Ok(lock(&self.shared.output).switches[slot])
    }

    pub fn snapshot(&self) -> PackState {
        self.shared.snapshot()
    }
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("id", &self.id())
            .field("cells", &self.cell_count())
            .field("state", &self.snapshot())
            .finish()
    }
}

impl Model for Pack {
    fn reset(&self) -> Result<()> {
        if self.is_running() {
            return Err(SimError::PackRunning);
        }
        *lock(&self.shared.output) = PackOutput::default();
        Ok(())
    }
}

impl Drop for Pack {
    fn drop(&mut self) {
        self.shared.run.request_stop();
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(lease: Lease, params: RunParams, observer: Option<Arc<dyn PackObserver>>) {
    let shared = Arc::clone(&lease.shared);
    let sleep = params.sleep_duration();
    let mut readings = Vec::with_capacity(lease.cells.len());

    info!(
        "pack started: {} cells, load {} ohm, tick {} ms, speed x{}",
        lease.cells.len(),
        params.load,
        params.tick_period,
        params.speed
    );
    if let Some(observer) = &observer {
        observer.on_start(&shared.snapshot());
    }

    while shared.run.should_continue() {
        readings.clear();
        readings.extend(lease.cells.iter().map(|cell| CellReading {
            voltage: cell.current_voltage(),
            series_resistance: cell.series_resistance(),
        }));
        let plan = plan_tick(&readings, params.load, shared.tolerance);

        {
            let mut output = lock(&shared.output);
            output.output_voltage = plan.output_voltage;
            output.output_current = plan.output_current;
            output.switches = plan.active;
            for (slot, cell) in lease.cells.iter().enumerate() {
                if let Err(e) = cell.update(
                    shared.id,
                    plan.active[slot],
                    plan.sourced_currents[slot],
                    params.tick_period,
                ) {
                    warn!("cell {slot} rejected update: {e}");
                }
            }
        }

        thread::sleep(sleep);
        lock(&shared.output).elapsed_ms += params.tick_period;

        debug!(
            "tick: vout {:.6} V, iout {:.6} A, switches {:?}",
            plan.output_voltage, plan.output_current, plan.active
        );
        if let Some(observer) = &observer {
            let cells: Vec<CellState> = lease.cells.iter().map(|c| c.snapshot()).collect();
            observer.on_tick(&shared.snapshot(), &cells);
        }

        if plan.output_voltage < shared.cutoff_voltage {
            lock(&shared.output).switches = [false; MAX_CELLS];
            info!(
                "pack exhausted at {:.3} V after {} ms",
                plan.output_voltage,
                lock(&shared.output).elapsed_ms
            );
            if let Some(observer) = &observer {
                observer.on_exhausted(&shared.snapshot());
            }
            break;
        }
    }

    info!("pack stopped after {} ms", lock(&shared.output).elapsed_ms);
    if let Some(observer) = &observer {
        observer.on_stop(&shared.snapshot());
    }
    drop(lease);
}
