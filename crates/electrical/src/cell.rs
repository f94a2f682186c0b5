//! Single cell with a linear discharge curve.
//!
//! A cell is created and configured by whoever owns it and lent to a pack
//! for the length of a run. While lent, its parameters are frozen and only
//! the attaching pack may advance its discharge state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use simcore::{CellState, Model, Result, SimError};

/// Point of the discharge curve where its characteristic changes,
/// as a percentage of discharged capacity.
pub const SHIFT_PERCENT: f64 = 10.0;
/// Voltage drop at the shift point, as a percentage.
pub const DROP_PERCENT: f64 = 5.0;

pub const DEFAULT_INITIAL_VOLTAGE: f64 = 12.5;
pub const DEFAULT_SERIES_RESISTANCE: f64 = 20.0;
pub const DEFAULT_CAPACITY_MAH: f64 = 800.0;

/// mAh -> A·ms
const MAH_TO_AMP_MS: f64 = 3600.0;

/// Identity of a pack for the purpose of cell attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackId(u64);

impl PackId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PackId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CellConstant {
    pub initial_voltage: f64,
    pub series_resistance: f64,
    /// Capacity in A·ms.
    pub capacity: f64,
}

impl Default for CellConstant {
    fn default() -> Self {
        CellConstant {
            initial_voltage: DEFAULT_INITIAL_VOLTAGE,
            series_resistance: DEFAULT_SERIES_RESISTANCE,
            capacity: DEFAULT_CAPACITY_MAH * MAH_TO_AMP_MS,
        }
    }
}

impl CellConstant {
    /// Slope of the dominant region of the discharge curve, in V per A·ms.
    pub fn gradient(&self) -> f64 {
        let v = self.initial_voltage;
        let c = self.capacity;
        (v * SHIFT_PERCENT - v * DROP_PERCENT) / (c * SHIFT_PERCENT - c * DROP_PERCENT)
    }
}

#[derive(Debug)]
struct CellInner {
    constants: CellConstant,
    gradient: f64,
    offset: f64,
    current_voltage: f64,
    discharged_capacity: f64,
    remaining_capacity_percent: f64,
    sourced_current: f64,
    attached_to: Option<PackId>,
}

impl CellInner {
    fn rest(&mut self) {
        self.current_voltage = self.constants.initial_voltage;
        self.discharged_capacity = 0.0;
        self.remaining_capacity_percent = 100.0;
        self.offset = 0.0;
    }
}

#[derive(Debug)]
pub struct Cell {
    inner: Mutex<CellInner>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell::from_constants(CellConstant::default())
    }
}

impl Cell {
    pub fn new(initial_voltage: f64, series_resistance: f64, capacity_mah: f64) -> Result<Self> {
        let cell = Cell::default();
        cell.set_initial_voltage(initial_voltage)?;
        cell.set_series_resistance(series_resistance)?;
        cell.set_capacity(capacity_mah)?;
        Ok(cell)
    }

    fn from_constants(constants: CellConstant) -> Self {
        Cell {
            inner: Mutex::new(CellInner {
                constants,
                gradient: constants.gradient(),
                offset: 0.0,
                current_voltage: constants.initial_voltage,
                discharged_capacity: 0.0,
                remaining_capacity_percent: 100.0,
                sourced_current: 0.0,
                attached_to: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_unattached<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut CellConstant),
    {
        let mut inner = self.lock();
        if inner.attached_to.is_some() {
            return Err(SimError::CellAttached);
        }
        apply(&mut inner.constants);
        Ok(())
    }

    pub fn set_initial_voltage(&self, volts: f64) -> Result<()> {
        if !(volts > 0.0 && volts.is_finite()) {
            return Err(SimError::InvalidParameter { name: "initial voltage", value: volts });
        }
        self.with_unattached(|c| c.initial_voltage = volts)
    }

    pub fn set_series_resistance(&self, ohms: f64) -> Result<()> {
        if !(ohms > 0.0 && ohms.is_finite()) {
            return Err(SimError::InvalidParameter { name: "series resistance", value: ohms });
        }
        self.with_unattached(|c| c.series_resistance = ohms)
    }

    /// Sets the rated capacity in mAh.
    pub fn set_capacity(&self, mah: f64) -> Result<()> {
        if !(mah > 0.0 && mah.is_finite()) {
            return Err(SimError::InvalidParameter { name: "capacity", value: mah });
        }
        self.with_unattached(|c| c.capacity = mah * MAH_TO_AMP_MS)
    }

    /// Lends the cell to `owner`, deriving the curve coefficients from the
    /// current parameters and restoring a full charge.
    pub fn attach(&self, owner: PackId) -> Result<()> {
        let mut inner = self.lock();
        if inner.attached_to.is_some() {
            return Err(SimError::CellAttached);
        }
        inner.attached_to = Some(owner);
        inner.gradient = inner.constants.gradient();
        inner.rest();
        Ok(())
    }

    /// Returns the cell to its owner. The discharge state is kept for
    /// inspection after the run.
    pub fn detach(&self, owner: PackId) -> Result<()> {
        let mut inner = self.lock();
        match inner.attached_to {
            None => Err(SimError::NotAttached),
            Some(id) if id != owner => Err(SimError::NotOwner),
            Some(_) => {
                inner.attached_to = None;
                Ok(())
            }
        }
    }

    /// Advances the discharge state by one tick of `tick_period` ms while
    /// sourcing `sourced_current` A.
    pub fn update(
        &self,
        owner: PackId,
        connected: bool,
        sourced_current: f64,
        tick_period: f64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.attached_to != Some(owner) {
            inner.sourced_current = 0.0;
            return Err(if inner.attached_to.is_none() {
                SimError::NotAttached
            } else {
                SimError::NotOwner
            });
        }
        if tick_period == 0.0 {
            inner.sourced_current = 0.0;
            return Err(SimError::ZeroTickPeriod);
        }
        if !connected {
            inner.sourced_current = 0.0;
            return Ok(());
        }

        let capacity = inner.constants.capacity;
        inner.sourced_current = sourced_current;
        inner.discharged_capacity += sourced_current * tick_period;
        inner.remaining_capacity_percent =
            100.0 * (capacity - inner.discharged_capacity) / capacity;
        inner.current_voltage -= inner.gradient * sourced_current * tick_period - inner.offset;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached_to.is_some()
    }

    pub fn initial_voltage(&self) -> f64 {
        self.lock().constants.initial_voltage
    }

    pub fn series_resistance(&self) -> f64 {
        self.lock().constants.series_resistance
    }

    /// Rated capacity in mAh.
    pub fn capacity(&self) -> f64 {
        self.lock().constants.capacity / MAH_TO_AMP_MS
    }

    pub fn current_voltage(&self) -> f64 {
        self.lock().current_voltage
    }

    pub fn discharged_capacity(&self) -> f64 {
        self.lock().discharged_capacity
    }

    pub fn remaining_capacity_percentage(&self) -> f64 {
        self.lock().remaining_capacity_percent
    }

    pub fn source_current(&self) -> f64 {
        self.lock().sourced_current
    }

    pub fn gradient(&self) -> f64 {
        self.lock().gradient
    }

    pub fn snapshot(&self) -> CellState {
        let inner = self.lock();
        CellState {
            initial_voltage: inner.constants.initial_voltage,
            series_resistance: inner.constants.series_resistance,
            capacity_mah: inner.constants.capacity / MAH_TO_AMP_MS,
            current_voltage: inner.current_voltage,
            discharged_capacity: inner.discharged_capacity,
            remaining_capacity_percent: inner.remaining_capacity_percent,
            sourced_current: inner.sourced_current,
            attached: inner.attached_to.is_some(),
        }
    }
}

impl Model for Cell {
    fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.attached_to.is_some() {
            return Err(SimError::CellAttached);
        }
        inner.rest();
        inner.sourced_current = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn attached_cell() -> (Cell, PackId) {
        let cell = Cell::new(12.5, 20.0, 800.0).unwrap();
        let owner = PackId::next();
        cell.attach(owner).unwrap();
        (cell, owner)
    }

    #[test]
    fn test_attach_resets_dynamic_state() {
        let (cell, owner) = attached_cell();
        cell.update(owner, true, 0.5, 100.0).unwrap();
        cell.detach(owner).unwrap();

        let other = PackId::next();
        cell.attach(other).unwrap();
        let state = cell.snapshot();
        assert_eq!(state.current_voltage, 12.5);
        assert_eq!(state.remaining_capacity_percent, 100.0);
        assert_eq!(state.discharged_capacity, 0.0);
        assert!(state.attached);
    }

    #[test]
    fn test_gradient_from_calibration() {
        let (cell, _) = attached_cell();
        // shift and drop cancel out, leaving V/C
        assert_relative_eq!(cell.gradient(), 12.5 / (800.0 * 3600.0), max_relative = 1e-12);
    }

    #[test]
    fn test_double_attach_rejected() {
        let (cell, _) = attached_cell();
        assert!(matches!(cell.attach(PackId::next()), Err(SimError::CellAttached)));
    }

    #[test]
    fn test_detach_ownership() {
        let cell = Cell::default();
        let owner = PackId::next();
        assert!(matches!(cell.detach(owner), Err(SimError::NotAttached)));

        cell.attach(owner).unwrap();
        assert!(matches!(cell.detach(PackId::next()), Err(SimError::NotOwner)));
        assert!(cell.is_attached());
        cell.detach(owner).unwrap();
        assert!(!cell.is_attached());
    }

    #[test]
    fn test_setters_blocked_while_attached() {
        let (cell, owner) = attached_cell();
        assert!(matches!(cell.set_initial_voltage(13.0), Err(SimError::CellAttached)));
        assert!(matches!(cell.set_series_resistance(5.0), Err(SimError::CellAttached)));
        assert!(matches!(cell.set_capacity(100.0), Err(SimError::CellAttached)));
        assert_eq!(cell.initial_voltage(), 12.5);

        cell.detach(owner).unwrap();
        cell.set_capacity(1000.0).unwrap();
        assert_relative_eq!(cell.capacity(), 1000.0);
    }

    #[test]
    fn test_setters_validate_values() {
        let cell = Cell::default();
        assert!(cell.set_series_resistance(0.0).is_err());
        assert!(cell.set_capacity(-1.0).is_err());
        assert!(cell.set_initial_voltage(f64::NAN).is_err());
        assert!(cell.set_initial_voltage(0.0).is_err());
        assert!(cell.set_initial_voltage(-3.0).is_err());
        assert_eq!(cell.initial_voltage(), DEFAULT_INITIAL_VOLTAGE);
        assert!(matches!(
            Cell::new(0.0, 20.0, 800.0),
            Err(SimError::InvalidParameter { name: "initial voltage", .. })
        ));
    }

    #[test]
    fn test_connected_update_discharges() {
        let (cell, owner) = attached_cell();
        let capacity = 800.0 * 3600.0;
        cell.update(owner, true, 0.04, 100.0).unwrap();

        let state = cell.snapshot();
        assert_relative_eq!(state.discharged_capacity, 4.0);
        assert_relative_eq!(state.remaining_capacity_percent, 100.0 * (capacity - 4.0) / capacity);
        assert_relative_eq!(state.current_voltage, 12.5 - (12.5 / capacity) * 4.0);
        assert_relative_eq!(state.sourced_current, 0.04);
    }

    #[test]
    fn test_disconnected_update_only_zeroes_current() {
        let (cell, owner) = attached_cell();
        cell.update(owner, true, 0.04, 100.0).unwrap();
        let before = cell.snapshot();

        cell.update(owner, false, 0.3, 100.0).unwrap();
        let after = cell.snapshot();
        assert_eq!(after.sourced_current, 0.0);
        assert_eq!(after.current_voltage, before.current_voltage);
        assert_eq!(after.discharged_capacity, before.discharged_capacity);
        assert_eq!(after.remaining_capacity_percent, before.remaining_capacity_percent);
    }

    #[test]
    fn test_update_rejects_stranger_and_zero_period() {
        let (cell, owner) = attached_cell();
        cell.update(owner, true, 0.04, 100.0).unwrap();

        assert!(matches!(
            cell.update(PackId::next(), true, 0.04, 100.0),
            Err(SimError::NotOwner)
        ));
        assert_eq!(cell.source_current(), 0.0);

        cell.update(owner, true, 0.04, 100.0).unwrap();
        assert!(matches!(cell.update(owner, true, 0.04, 0.0), Err(SimError::ZeroTickPeriod)));
        assert_eq!(cell.source_current(), 0.0);
        assert_relative_eq!(cell.discharged_capacity(), 8.0);
    }

    #[test]
    fn test_discharged_capacity_monotonic() {
        let (cell, owner) = attached_cell();
        let mut last = 0.0;
        for i in 0..50 {
            cell.update(owner, i % 3 != 0, 0.02, 10.0).unwrap();
            let now = cell.discharged_capacity();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_remaining_capacity_can_go_negative() {
        let cell = Cell::new(12.0, 1.0, 1.0).unwrap();
        let owner = PackId::next();
        cell.attach(owner).unwrap();
        cell.update(owner, true, 10.0, 1000.0).unwrap();
        assert!(cell.remaining_capacity_percentage() < 0.0);
    }

    #[test]
    fn test_detach_keeps_state_and_reset_restores() {
        let (cell, owner) = attached_cell();
        cell.update(owner, true, 0.04, 100.0).unwrap();
        cell.detach(owner).unwrap();
        assert_relative_eq!(cell.discharged_capacity(), 4.0);

        cell.reset().unwrap();
        let state = cell.snapshot();
        assert_eq!(state.current_voltage, 12.5);
        assert_eq!(state.discharged_capacity, 0.0);
        assert_eq!(state.sourced_current, 0.0);
    }

    #[test]
    fn test_reset_blocked_while_attached() {
        let (cell, _) = attached_cell();
        assert!(matches!(cell.reset(), Err(SimError::CellAttached)));
    }
}
