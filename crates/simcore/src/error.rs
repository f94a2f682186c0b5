use thiserror::Error;

/// Everything the simulator can refuse to do.
///
/// Precondition violations and state conflicts are reported synchronously
/// by the call that caused them; nothing is mutated when one is returned.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("operation rejected while the pack is running")]
    PackRunning,
    #[error("the pack is not running")]
    NotRunning,
    #[error("the pack already holds {0} cells")]
    PackFull(usize),
    #[error("the pack has no cells")]
    NoCells,
    #[error("cell is attached to a pack")]
    CellAttached,
    #[error("cell is not attached")]
    NotAttached,
    #[error("cell is attached to a different pack")]
    NotOwner,
    #[error("a cell lent to the pack has been dropped")]
    CellDropped,
    #[error("switch slot {0} is out of range")]
    SlotOutOfRange(usize),
    #[error("load must be non-zero")]
    ZeroLoad,
    #[error("tick period must be non-zero")]
    ZeroTickPeriod,
    #[error("speed factor must be non-zero")]
    ZeroSpeed,
    #[error("no pack connected")]
    NotConnected,
    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("failed to spawn the pack worker: {0}")]
    Spawn(std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
