//! Tokenizing and validation of console input.
//!
//! A line has the shape `<command> [key] [v1 v2 v3]`. Numeric values past
//! what the key needs are dropped and counted so the console can say so.

use thiserror::Error;

/// Something the operator can read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    InitVoltage,
    SeriesRes,
    LoadRes,
    CVoltage,
    Cutoff,
    SourceCurr,
    RemainCap,
    Capacity,
    Switch,
    Elapsed,
    Vout,
    Iout,
    Speed,
    Resolution,
}

const KEYS: [(&str, Key); 14] = [
    ("initvoltage", Key::InitVoltage),
    ("seriesres", Key::SeriesRes),
    ("loadres", Key::LoadRes),
    ("cvoltage", Key::CVoltage),
    ("cutoff", Key::Cutoff),
    ("sourcecurr", Key::SourceCurr),
    ("remaincap", Key::RemainCap),
    ("capacity", Key::Capacity),
    ("switch", Key::Switch),
    ("elapsed", Key::Elapsed),
    ("vout", Key::Vout),
    ("iout", Key::Iout),
    ("speed", Key::Speed),
    ("resolution", Key::Resolution),
];

impl Key {
    pub fn parse(word: &str) -> Option<Self> {
        KEYS.iter().find(|(name, _)| *name == word).map(|(_, key)| *key)
    }

    pub fn name(self) -> &'static str {
        KEYS.iter()
            .find(|(_, key)| *key == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }
}

/// Per-cell parameter set with one value for each slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellParam {
    InitialVoltage,
    SeriesResistance,
    Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAction {
    Start,
    Stop,
    Pause,
    Resume,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(Key),
    SetCells(CellParam, Vec<f64>),
    SetLoad(f64),
    SetSpeed(f64),
    SetResolution(f64),
    Sim(SimAction),
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub command: Command,
    /// Values given beyond what the command takes.
    pub ignored: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,
    #[error("{0} is not a valid command")]
    UnknownCommand(String),
    #[error("{key} is not a valid key for {command} command")]
    UnknownKey { command: String, key: String },
    #[error("{0} needs a key")]
    MissingKey(String),
    #[error("{0} is not a number")]
    NotANumber(String),
    #[error("insufficient arguments: {key} needs {needed} value(s)")]
    MissingValues { key: &'static str, needed: usize },
}

fn values(words: &[&str]) -> Result<Vec<f64>, ParseError> {
    words
        .iter()
        .map(|w| w.parse::<f64>().map_err(|_| ParseError::NotANumber(w.to_string())))
        .collect()
}

fn take(key: &'static str, values: Vec<f64>, needed: usize) -> Result<(Vec<f64>, usize), ParseError> {
    if values.len() < needed {
        return Err(ParseError::MissingValues { key, needed });
    }
    let ignored = values.len() - needed;
    Ok((values.into_iter().take(needed).collect(), ignored))
}

pub fn parse(line: &str) -> Result<Parsed, ParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (&command, rest) = words.split_first().ok_or(ParseError::Empty)?;

    let unknown_key = |key: &str| ParseError::UnknownKey {
        command: command.to_string(),
        key: key.to_string(),
    };
    let key_and_values = || {
        rest.split_first()
            .map(|(key, vals)| (*key, vals))
            .ok_or_else(|| ParseError::MissingKey(command.to_string()))
    };

    match command {
        "help" => Ok(Parsed { command: Command::Help, ignored: rest.len() }),
        "exit" => Ok(Parsed { command: Command::Exit, ignored: rest.len() }),
        "get" => {
            let (key, vals) = key_and_values()?;
            let key = Key::parse(key).ok_or_else(|| unknown_key(key))?;
            Ok(Parsed { command: Command::Get(key), ignored: vals.len() })
        }
        "sim" => {
            let (key, vals) = key_and_values()?;
            let action = match key {
                "start" => SimAction::Start,
                "stop" => SimAction::Stop,
                "pause" => SimAction::Pause,
                "resume" => SimAction::Resume,
                "reset" => SimAction::Reset,
                other => return Err(unknown_key(other)),
            };
            Ok(Parsed { command: Command::Sim(action), ignored: vals.len() })
        }
        "set" => {
            let (key, vals) = key_and_values()?;
            let parsed_key = Key::parse(key).ok_or_else(|| unknown_key(key))?;
            let name = parsed_key.name();
            let cell_param = match parsed_key {
                Key::InitVoltage => Some(CellParam::InitialVoltage),
                Key::SeriesRes => Some(CellParam::SeriesResistance),
                Key::Capacity => Some(CellParam::Capacity),
                _ => None,
            };
            let vals = values(vals)?;
            if let Some(param) = cell_param {
                let (vals, ignored) = take(name, vals, 3)?;
                return Ok(Parsed { command: Command::SetCells(param, vals), ignored });
            }
            let (vals, ignored) = take(name, vals, 1)?;
            let command = match parsed_key {
                Key::LoadRes => Command::SetLoad(vals[0]),
                Key::Speed => Command::SetSpeed(vals[0]),
                Key::Resolution => Command::SetResolution(vals[0]),
                _ => return Err(unknown_key(key)),
            };
            Ok(Parsed { command, ignored })
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}
