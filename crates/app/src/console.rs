//! Command dispatch for the interactive console.

use std::io::{self, Write};
use std::sync::Arc;

use electrical::{Cell, Pack, Simulation, SimulationConfig};
use log::warn;
use simcore::{MAX_CELLS, Model, Result as SimResult, SimError};

use crate::command::{CellParam, Command, Key, SimAction};

pub const HELP: &str = "
BATSIM

NAME
\tbatsim - real-time discharge simulation of a three-cell battery pack

DESCRIPTION
\tSimulates a battery pack of up to three parallel cells connected through switches.
\tGeneric command format is: batsim>> <command> <key> <value1> <value2> <value3>
\tExtra values are ignored.

COMMANDS AND KEYS
\tset   <key> <values>   initvoltage, seriesres, capacity take one value per cell;
\t                       loadres, speed, resolution take one value.
\t                       Rejected while the simulation is running.
\tget   <key>            initvoltage, seriesres, loadres, cvoltage, cutoff, sourcecurr,
\t                       remaincap, capacity, switch, elapsed, vout, iout, speed, resolution
\tsim   <action>         start, stop, pause, resume, reset
\thelp                   prints this text
\texit                   stops a running simulation and exits

DEFAULT VALUES
\tInitial voltages   : 12.5 V, 14.1 V, 12.9 V
\tSeries resistances : 20 Ohm, 30 Ohm, 40 Ohm
\tLoad               : 150 Ohm
\tCapacity           : 800 mAh
\tCutoff voltage     : 8 V
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console {
    simulation: Simulation,
    pack: Arc<Pack>,
    cells: Vec<Arc<Cell>>,
}

impl Console {
    pub fn from_config(config: &SimulationConfig) -> SimResult<Self> {
        let (simulation, cells) = Simulation::from_config(config)?;
        let pack = simulation.pack().cloned().ok_or(SimError::NotConnected)?;
        Ok(Console { simulation, pack, cells })
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Stops a running simulation before the console goes away.
    pub fn shutdown(&self) {
        if self.simulation.is_running() {
            if let Err(e) = self.simulation.stop() {
                warn!("could not stop simulation on exit: {e}");
            }
        }
    }

    fn per_cell<W: Write>(
        &self,
        out: &mut W,
        title: &str,
        value: impl Fn(&Cell) -> String,
    ) -> io::Result<()> {
        writeln!(out, "{title}")?;
        for (slot, cell) in self.cells.iter().enumerate() {
            writeln!(out, "Cell {}: {}", slot + 1, value(cell))?;
        }
        Ok(())
    }

    fn outcome<W: Write>(out: &mut W, done: &str, result: SimResult<()>) -> io::Result<()> {
        match result {
            Ok(()) => writeln!(out, "{done}"),
            Err(e) => writeln!(out, "Failed: {e}."),
        }
    }

    fn get<W: Write>(&self, key: Key, out: &mut W) -> io::Result<()> {
        match key {
            Key::InitVoltage => self.per_cell(out, "Initial cell voltage:", |c| {
                format!("{:.3} V", c.initial_voltage())
            }),
            Key::SeriesRes => self.per_cell(out, "Series resistance:", |c| {
                format!("{:.3} Ohm", c.series_resistance())
            }),
            Key::CVoltage => self.per_cell(out, "Cell voltage:", |c| {
                format!("{:.3} V", c.current_voltage())
            }),
            Key::SourceCurr => self.per_cell(out, "Current sourced by each cell:", |c| {
                format!("{:.3} mA", c.source_current() * 1000.0)
            }),
            Key::RemainCap => self.per_cell(out, "Remaining capacity:", |c| {
                format!("{:.3} %", c.remaining_capacity_percentage())
            }),
            Key::Capacity => self.per_cell(out, "Cell capacity:", |c| {
                format!("{:.3} mAh", c.capacity())
            }),
            Key::Switch => {
                writeln!(out, "Switch status:")?;
                for slot in 0..MAX_CELLS {
                    let closed = self.pack.switch_status(slot).unwrap_or(false);
                    writeln!(out, "Switch {}: {}", slot + 1, if closed { "ON" } else { "OFF" })?;
                }
                Ok(())
            }
            Key::LoadRes => writeln!(out, "Load: {:.3} Ohm", self.simulation.load()),
            Key::Cutoff => writeln!(out, "Cutoff voltage: {:.3} V", self.pack.cutoff_voltage()),
            Key::Elapsed => writeln!(out, "Elapsed time: {:.3} s", self.pack.elapsed_time() / 1000.0),
            Key::Vout => writeln!(out, "Output voltage: {:.3} V", self.pack.output_voltage()),
            Key::Iout => writeln!(out, "Output current: {:.3} mA", self.pack.output_current() * 1000.0),
            Key::Speed => writeln!(out, "Speed: x{}", self.simulation.speed()),
            Key::Resolution => writeln!(out, "Resolution: {} ms", self.simulation.resolution()),
        }
    }

    fn set_cells<W: Write>(&self, param: CellParam, values: &[f64], out: &mut W) -> io::Result<()> {
        for (slot, (cell, value)) in self.cells.iter().zip(values).enumerate() {
            let result = match param {
                CellParam::InitialVoltage => cell.set_initial_voltage(*value),
                CellParam::SeriesResistance => cell.set_series_resistance(*value),
                CellParam::Capacity => cell.set_capacity(*value),
            };
            match result {
                Ok(()) => writeln!(out, "Cell {}: Done.", slot + 1)?,
                Err(e) => writeln!(out, "Cell {}: Failed ({e}).", slot + 1)?,
            }
        }
        Ok(())
    }

    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> io::Result<Flow> {
        match command {
            Command::Get(key) => self.get(key, out)?,
            Command::SetCells(param, values) => self.set_cells(param, &values, out)?,
            Command::SetLoad(ohms) => {
                let result = self.simulation.set_load(ohms);
                Self::outcome(out, "Load set.", result)?
            }
            Command::SetSpeed(speed) => {
                let result = self.simulation.set_speed(speed);
                Self::outcome(out, "Speed set.", result)?
            }
            Command::SetResolution(ms) => {
                let result = self.simulation.set_resolution(ms);
                Self::outcome(out, "Resolution set.", result)?
            }
            Command::Sim(SimAction::Start) => match self.simulation.start() {
                Ok(()) => writeln!(out, "Simulation started.")?,
                Err(SimError::PackRunning) => writeln!(out, "Simulation already running.")?,
                Err(e) => writeln!(out, "Simulation not started: {e}.")?,
            },
            Command::Sim(SimAction::Stop) => match self.simulation.stop() {
                Ok(()) => writeln!(out, "Simulation stopped.")?,
                Err(SimError::NotRunning) => writeln!(out, "Simulation is not running currently.")?,
                Err(e) => writeln!(out, "Simulation not stopped: {e}.")?,
            },
            Command::Sim(SimAction::Pause) => {
                Self::outcome(out, "Simulation paused.", self.simulation.pause())?
            }
            Command::Sim(SimAction::Resume) => {
                Self::outcome(out, "Simulation resumed.", self.simulation.resume())?
            }
            Command::Sim(SimAction::Reset) => {
                Self::outcome(out, "Simulation reset.", self.simulation.reset())?
            }
            Command::Help => write!(out, "{HELP}")?,
            Command::Exit => {
                self.shutdown();
                writeln!(out, "Simulation process ended.")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;
    use std::thread;
    use std::time::{Duration, Instant};

    fn console() -> Console {
        let config = SimulationConfig {
            resolution_ms: 10.0,
            speed: 1000.0,
            ..Default::default()
        };
        Console::from_config(&config).unwrap()
    }

    fn run(console: &mut Console, line: &str) -> (String, Flow) {
        let mut out = Vec::new();
        let flow = console.execute(parse(line).unwrap().command, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), flow)
    }

    #[test]
    fn test_get_defaults() {
        let mut console = console();
        let (text, flow) = run(&mut console, "get initvoltage");
        assert_eq!(flow, Flow::Continue);
        assert!(text.contains("Cell 1: 12.500 V"));
        assert!(text.contains("Cell 2: 14.100 V"));
        assert!(text.contains("Cell 3: 12.900 V"));

        let (text, _) = run(&mut console, "get cutoff");
        assert!(text.contains("8.000 V"));
        let (text, _) = run(&mut console, "get switch");
        assert!(text.contains("Switch 3: OFF"));
        let (text, _) = run(&mut console, "get capacity");
        assert!(text.contains("800.000 mAh"));
    }

    #[test]
    fn test_set_cells_and_load() {
        let mut console = console();
        let (text, _) = run(&mut console, "set seriesres 10 0 30");
        assert!(text.contains("Cell 1: Done."));
        assert!(text.contains("Cell 2: Failed"));
        assert!(text.contains("Cell 3: Done."));

        let (text, _) = run(&mut console, "set loadres 75");
        assert_eq!(text, "Load set.\n");
        assert_eq!(console.simulation().load(), 75.0);
    }

    #[test]
    fn test_sim_lifecycle_messages() {
        let mut console = console();
        let (text, _) = run(&mut console, "sim stop");
        assert_eq!(text, "Simulation is not running currently.\n");

        let (text, _) = run(&mut console, "sim start");
        assert_eq!(text, "Simulation started.\n");
        let (text, _) = run(&mut console, "sim start");
        assert_eq!(text, "Simulation already running.\n");

        let (text, _) = run(&mut console, "set initvoltage 1 2 3");
        assert!(text.contains("Cell 1: Failed"));
        let (text, _) = run(&mut console, "set speed 5");
        assert!(text.starts_with("Failed"));

        let deadline = Instant::now() + Duration::from_secs(5);
        while console.pack.elapsed_time() == 0.0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        let (text, _) = run(&mut console, "get switch");
        assert!(text.contains("Switch 2: ON"));

        let (text, _) = run(&mut console, "sim stop");
        assert_eq!(text, "Simulation stopped.\n");
        let (text, _) = run(&mut console, "sim reset");
        assert_eq!(text, "Simulation reset.\n");
    }

    #[test]
    fn test_exit_stops_simulation() {
        let mut console = console();
        run(&mut console, "sim start");
        let (text, flow) = run(&mut console, "exit");
        assert_eq!(flow, Flow::Exit);
        assert!(text.contains("ended"));
        assert!(!console.simulation().is_running());
    }

    #[test]
    fn test_help() {
        let mut console = console();
        let (text, _) = run(&mut console, "help");
        assert!(text.contains("COMMANDS AND KEYS"));
    }
}
