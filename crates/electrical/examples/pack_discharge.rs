use electrical::{CellConfig, Simulation, SimulationConfig};
use std::fs::File;
use std::io::Write;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Small cells so the pack reaches cutoff within a few seconds
    let config = SimulationConfig {
        cells: vec![
            CellConfig::new(12.5, 20.0).with_capacity(2.0),
            CellConfig::new(14.1, 30.0).with_capacity(2.0),
            CellConfig::new(12.9, 40.0).with_capacity(2.0),
        ],
        load_ohms: 150.0,
        resolution_ms: 100.0,
        speed: 1.0e5,
        run_log: None,
    };
    let (simulation, cells) = Simulation::from_config(&config)?;
    let pack = simulation.pack().ok_or("no pack")?.clone();

    let mut csv = File::create("pack_discharge.csv")?;
    writeln!(csv, "t_ms,vout,iout_ma,v1,v2,v3,s1,s2,s3")?;

    simulation.start()?;
    while simulation.is_running() {
        let state = pack.snapshot();
        writeln!(
            csv,
            "{:.1},{:.6},{:.6},{:.6},{:.6},{:.6},{},{},{}",
            state.elapsed_ms,
            state.output_voltage,
            state.output_current * 1000.0,
            cells[0].current_voltage(),
            cells[1].current_voltage(),
            cells[2].current_voltage(),
            u8::from(state.switches[0]),
            u8::from(state.switches[1]),
            u8::from(state.switches[2]),
        )?;
        thread::sleep(Duration::from_millis(1));
    }
    pack.wait()?;

    println!(
        "Pack exhausted after {:.1} s simulated; wrote pack_discharge.csv",
        pack.elapsed_time() / 1000.0
    );
    Ok(())
}
