mod command;
mod console;

use std::env;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use electrical::{DEFAULT_RUN_LOG, SimulationConfig};
use log::{LevelFilter, debug, error, info};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use crate::command::{ParseError, parse};
use crate::console::{Console, Flow};

const PROMPT: &str = "batsim>> ";
const DEBUG_LOG: &str = "batsim-debug.log";

fn init_logging() {
    let level = env::var("BATSIM_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Ok(path) = env::var("BATSIM_DEBUG_LOG") {
        let path = if path.is_empty() { DEBUG_LOG.to_string() } else { path };
        match File::create(&path) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file)),
            Err(e) => eprintln!("cannot open debug log {path}: {e}"),
        }
    }
    let _ = CombinedLogger::init(loggers);
}

fn load_config() -> simcore::Result<SimulationConfig> {
    match env::args().nth(1) {
        Some(path) => {
            info!("loading configuration from {path}");
            SimulationConfig::from_path(path)
        }
        None => Ok(SimulationConfig {
            speed: 100_000.0,
            resolution_ms: 10.0,
            run_log: Some(DEFAULT_RUN_LOG.into()),
            ..Default::default()
        }),
    }
}

fn repl(console: &mut Console) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            console.shutdown();
            return Ok(());
        }

        let parsed = match parse(&line) {
            Ok(parsed) => parsed,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                writeln!(stdout, "{e}. Type help for usage.")?;
                continue;
            }
        };
        debug!("command: {:?}", parsed.command);
        if parsed.ignored > 0 {
            writeln!(stdout, "Extra values omitted.")?;
        }
        if console.execute(parsed.command, &mut stdout)? == Flow::Exit {
            return Ok(());
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut console = match Console::from_config(&config) {
        Ok(console) => console,
        Err(e) => {
            error!("cannot build simulation: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Battery pack simulator. Type help for usage.");
    if let Err(e) = repl(&mut console) {
        error!("console I/O failed: {e}");
        console.shutdown();
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
