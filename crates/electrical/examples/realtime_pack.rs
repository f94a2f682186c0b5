use electrical::{Cell, Simulation, SimulationConfig};
use simcore::{MAX_CELLS, Model};

use egui_plot::{Legend, Line, Plot, PlotPoints};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const TRACE_CAPACITY: usize = 4000;

fn main() -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("Battery Pack Discharge"),
        ..Default::default()
    };
    eframe::run_native(
        "Battery Pack Discharge",
        options,
        Box::new(|_cc| Ok(Box::new(App::new()))),
    )
}

struct Trace {
    t: VecDeque<f64>,
    vout: VecDeque<f64>,
    iout_ma: VecDeque<f64>,
    cell_v: [VecDeque<f64>; MAX_CELLS],
}

impl Trace {
    fn new() -> Self {
        Self {
            t: VecDeque::with_capacity(TRACE_CAPACITY),
            vout: VecDeque::with_capacity(TRACE_CAPACITY),
            iout_ma: VecDeque::with_capacity(TRACE_CAPACITY),
            cell_v: std::array::from_fn(|_| VecDeque::with_capacity(TRACE_CAPACITY)),
        }
    }

    fn push(&mut self, t: f64, vout: f64, iout_ma: f64, cell_v: [f64; MAX_CELLS]) {
        // the worker may not have ticked since the last frame
        if self.t.back() == Some(&t) {
            return;
        }
        self.t.push_back(t);
        self.vout.push_back(vout);
        self.iout_ma.push_back(iout_ma);
        for (series, v) in self.cell_v.iter_mut().zip(cell_v) {
            series.push_back(v);
        }
        while self.t.len() > TRACE_CAPACITY {
            self.t.pop_front();
            self.vout.pop_front();
            self.iout_ma.pop_front();
            for series in &mut self.cell_v {
                series.pop_front();
            }
        }
    }

    fn line<'a>(points: &'a VecDeque<f64>, t: &'a VecDeque<f64>) -> PlotPoints<'a> {
        PlotPoints::from_iter(
            t.iter()
                .copied()
                .zip(points.iter().copied())
                .map(|(x, y)| [x, y])
        )
    }
}

struct App {
    simulation: Simulation,
    cells: Vec<Arc<Cell>>,
    trace: Trace,
    load: f64,
    speed: f64,
    status: String,
}

impl App {
    fn new() -> Self {
        let config = SimulationConfig {
            cells: SimulationConfig::default()
                .cells
                .into_iter()
                .map(|c| c.with_capacity(5.0))
                .collect(),
            speed: 1000.0,
            ..Default::default()
        };
        // the default config is always valid
        let (simulation, cells) = Simulation::from_config(&config).unwrap();
        Self {
            load: simulation.load(),
            speed: simulation.speed(),
            simulation,
            cells,
            trace: Trace::new(),
            status: String::from("idle"),
        }
    }

    fn sample(&mut self) {
        let Some(pack) = self.simulation.pack() else { return };
        let state = pack.snapshot();
        let mut cell_v = [0.0; MAX_CELLS];
        for (slot, cell) in self.cells.iter().enumerate().take(MAX_CELLS) {
            cell_v[slot] = cell.current_voltage();
        }
        self.trace.push(
            state.elapsed_ms / 1000.0,
            state.output_voltage,
            state.output_current * 1000.0,
            cell_v,
        );
    }

    fn report<T>(&mut self, what: &str, result: simcore::Result<T>) {
        self.status = match result {
            Ok(_) => what.to_string(),
            Err(e) => format!("{what} failed: {e}"),
        };
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sample();
        let running = self.simulation.is_running();

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                if ui.button(if running { "⏹ Stop" } else { "▶ Start" }).clicked() {
                    let result = if running { self.simulation.stop() } else { self.simulation.start() };
                    self.report(if running { "stopped" } else { "running" }, result);
                }
                if ui.add_enabled(!running, egui::Button::new("⟲ Reset")).clicked() {
                    let result = self.simulation.reset();
                    self.trace = Trace::new();
                    self.report("reset", result);
                }

                ui.separator();

                ui.add_enabled_ui(!running, |ui| {
                    ui.label("Load");
                    if ui.add(egui::Slider::new(&mut self.load, 1.0..=500.0).suffix(" Ω")).changed() {
                        let result = self.simulation.set_load(self.load);
                        self.report("load set", result);
                    }
                    ui.label("Speed");
                    if ui.add(egui::Slider::new(&mut self.speed, 1.0..=100000.0).logarithmic(true).suffix("×")).changed() {
                        let result = self.simulation.set_speed(self.speed);
                        self.report("speed set", result);
                    }
                });

                ui.separator();
                ui.label(&self.status);
            });
        });

        egui::SidePanel::right("cells").show(ctx, |ui| {
            ui.heading("Cells");
            let pack = self.simulation.pack().cloned();
            for (slot, cell) in self.cells.iter().enumerate() {
                let state = cell.snapshot();
                let closed = pack
                    .as_ref()
                    .and_then(|p| p.switch_status(slot).ok())
                    .unwrap_or(false);
                ui.label(format!(
                    "Cell {}  [{}]\n  {:.4} V\n  {:.3} mA\n  {:.2} % left",
                    slot + 1,
                    if closed { "ON" } else { "OFF" },
                    state.current_voltage,
                    state.sourced_current * 1000.0,
                    state.remaining_capacity_percent.max(0.0),
                ));
                ui.separator();
            }
            if let Some(pack) = &pack {
                ui.label(format!("Cutoff {:.1} V", pack.cutoff_voltage()));
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |cols| {
                cols[0].heading("Voltages");
                Plot::new("voltage_plot")
                    .legend(Legend::default())
                    .allow_scroll(false)
                    .x_axis_label("Time (s)")
                    .y_axis_label("Voltage (V)")
                    .show(&mut cols[0], |plot_ui| {
                        plot_ui.line(Line::new("V_out", Trace::line(&self.trace.vout, &self.trace.t)));
                        for (slot, series) in self.trace.cell_v.iter().enumerate().take(self.cells.len()) {
                            plot_ui.line(Line::new(format!("Cell {}", slot + 1), Trace::line(series, &self.trace.t)));
                        }
                    });

                cols[1].heading("Output current");
                Plot::new("current_plot")
                    .legend(Legend::default())
                    .allow_scroll(false)
                    .x_axis_label("Time (s)")
                    .y_axis_label("Current (mA)")
                    .show(&mut cols[1], |plot_ui| {
                        plot_ui.line(Line::new("I_out (mA)", Trace::line(&self.trace.iout_ma, &self.trace.t)));
                    });
            });
        });

        ctx.request_repaint_after(Duration::from_millis(30));
    }
}
