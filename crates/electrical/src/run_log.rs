//! Append-only text log of pack runs.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::warn;
use simcore::{CellState, PackObserver, PackState, Result};

pub const DEFAULT_RUN_LOG: &str = "./batsim.log";

const RULE: &str = "***************************************************";

pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RunLog { path, file: Mutex::new(file) })
    }

    fn write(&self, args: fmt::Arguments<'_>) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_fmt(args) {
            warn!("could not write run log {}: {e}", self.path.display());
        }
    }
}

fn seconds(pack: &PackState) -> f64 {
    pack.elapsed_ms / 1000.0
}

impl PackObserver for RunLog {
    fn on_start(&self, pack: &PackState) {
        self.write(format_args!(
            "{RULE}\n\t\t\tBattery Simulator\n{RULE}\n\n[{:9.3}]\tSimulator Started\n",
            seconds(pack)
        ));
    }

    fn on_tick(&self, pack: &PackState, cells: &[CellState]) {
        let mut entry = format!(
            "\n[{:9.3}]\toutVolt: {:.6}\tIout: {:.6}\n",
            seconds(pack),
            pack.output_voltage,
            pack.output_current * 1000.0
        );
        for (slot, cell) in cells.iter().enumerate() {
            let switch = pack.switches.get(slot).copied().unwrap_or(false);
            entry.push_str(&format!(
                "\tCell {}:: {}: {:.6} V,\t{:.6} mA\n",
                slot + 1,
                u8::from(switch),
                cell.current_voltage,
                cell.sourced_current * 1000.0
            ));
        }
        self.write(format_args!("{entry}"));
    }

    fn on_exhausted(&self, _pack: &PackState) {
        self.write(format_args!("ALERT :: exhausted\n"));
    }

    fn on_stop(&self, pack: &PackState) {
        self.write(format_args!("\n[{:9.3}]\tSimulator Stopped\n", seconds(pack)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("batsim-{}-{name}.log", std::process::id()))
    }

    #[test]
    fn test_events_are_appended() {
        let path = scratch_path("events");
        let _ = fs::remove_file(&path);

        let log = RunLog::open(&path).unwrap();
        let mut pack = PackState { elapsed_ms: 1500.0, output_voltage: 12.5, ..Default::default() };
        pack.switches[0] = true;
        pack.output_current = 12.5 / 150.0;
        let cell = CellState {
            initial_voltage: 12.5,
            series_resistance: 20.0,
            capacity_mah: 800.0,
            current_voltage: 12.5,
            discharged_capacity: 0.0,
            remaining_capacity_percent: 100.0,
            sourced_current: 0.05,
            attached: true,
        };

        log.on_start(&pack);
        log.on_tick(&pack, &[cell]);
        log.on_exhausted(&pack);
        log.on_stop(&pack);
        drop(log);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Battery Simulator"));
        assert!(text.contains("[    1.500]\tSimulator Started"));
        assert!(text.contains("outVolt: 12.500000\tIout: 83.333333"));
        assert!(text.contains("Cell 1:: 1: 12.500000 V,\t50.000000 mA"));
        assert!(text.contains("ALERT :: exhausted"));
        assert!(text.trim_end().ends_with("Simulator Stopped"));

        // a second run appends rather than truncates
        let log = RunLog::open(&path).unwrap();
        log.on_stop(&pack);
        drop(log);
        let again = fs::read_to_string(&path).unwrap();
        assert!(again.starts_with(&text));
        assert!(again.len() > text.len());

        let _ = fs::remove_file(&path);
    }
}
