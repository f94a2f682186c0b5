//! Run lifecycle shared between a pack and its worker thread.
//!
//! A single atomic holds the lifecycle phase. The worker polls it once per
//! tick, so a stop request or a cutoff only ever takes effect at a tick
//! boundary. Joining the worker is handled by the owner of the thread
//! handle, not here.

use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Never started, or returned to rest after a failed start.
    Idle = 0,
    /// A worker owns the pack.
    Running = 1,
    /// A stop has been asked for; the worker has not yet observed it.
    StopRequested = 2,
    /// The worker has released the cells and is exiting (or has exited).
    Stopped = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::StopRequested,
            3 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

#[derive(Debug)]
pub struct RunControl {
    state: AtomicU8,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub const fn new() -> Self {
        RunControl {
            state: AtomicU8::new(RunState::Idle as u8),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves a resting control into `Running`.
    ///
    /// Of any number of concurrent callers at most one gets `true`.
    pub fn try_begin(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match RunState::from_u8(current) {
                RunState::Idle | RunState::Stopped => {
                    match self.state.compare_exchange(
                        current,
                        RunState::Running as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(actual) => current = actual,
                    }
                }
                RunState::Running | RunState::StopRequested => return false,
            }
        }
    }

    /// `Running -> StopRequested`. Fails if no run is in progress or a stop
    /// was already requested.
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Running as u8,
                RunState::StopRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Polled by the worker at the top of every tick.
    pub fn should_continue(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Called by the worker as its last act, whether it was asked to stop
    /// or ran into the cutoff.
    pub fn finish(&self) {
        let previous = self.state.swap(RunState::Stopped as u8, Ordering::AcqRel);
        trace!("run finished from {:?}", RunState::from_u8(previous));
    }

    /// Undoes a `try_begin` whose worker never started.
    pub fn abort(&self) {
        debug!("run aborted before its worker started");
        self.state.store(RunState::Idle as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), RunState::Running | RunState::StopRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_begin_only_once() {
        let control = RunControl::new();
        assert!(control.try_begin());
        assert!(!control.try_begin());
        assert!(control.is_running());
    }

    #[test]
    fn test_stop_requires_running() {
        let control = RunControl::new();
        assert!(!control.request_stop());

        control.try_begin();
        assert!(control.request_stop());
        assert!(!control.request_stop());
        // still running until the worker finishes
        assert!(control.is_running());
        assert!(!control.should_continue());

        control.finish();
        assert!(!control.is_running());
        assert_eq!(control.state(), RunState::Stopped);
    }

    #[test]
    fn test_restart_after_finish() {
        let control = RunControl::new();
        assert!(control.try_begin());
        control.finish();
        assert!(control.try_begin());
        control.abort();
        assert_eq!(control.state(), RunState::Idle);
        assert!(control.try_begin());
    }

    #[test]
    fn test_concurrent_begin_single_winner() {
        let control = Arc::new(RunControl::new());
        let barrier = Arc::new(Barrier::new(101));

        let handles: Vec<_> = (0..101)
            .map(|_| {
                let control = Arc::clone(&control);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    control.try_begin()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
