//! Budget ledger shared by every phase of every run in a process.
//!
//! Spend goes through a two-phase protocol: [`BudgetLedger::reserve`] holds
//! an estimated amount, then [`BudgetLedger::commit`] settles the actual cost
//! or [`BudgetLedger::rollback`] releases the hold. Reservation is the only
//! gate, so concurrent phases cannot jointly overspend.
//!
//! Invariant (outside an operator override or a window resumed above a
//! lowered limit): `committed + reserved <= limit`. A ledger already over its
//! limit has no remaining budget; recorded spend is never reduced.

mod window;

pub use window::{LedgerWindow, WindowLock};

use phaseline_utils::{Cost, LedgerError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Handle for an outstanding reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationId(u64);

impl ReservationId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of settling a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Amount moved into `committed`
    pub charged: Cost,
    /// Actual cost that did not fit under the limit
    pub overrun: Cost,
}

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub limit: Cost,
    pub committed: Cost,
    pub reserved: Cost,
    pub overrun: Cost,
    pub alert_threshold: f64,
    pub alert_fired: bool,
    pub outstanding_reservations: usize,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn remaining(&self) -> Cost {
        self.limit - self.committed - self.reserved
    }
}

#[derive(Debug)]
struct LedgerState {
    limit: Cost,
    committed: Cost,
    reserved: Cost,
    overrun: Cost,
    reservations: HashMap<u64, Cost>,
    next_id: u64,
    alert_fired: bool,
}

#[derive(Debug)]
pub struct BudgetLedger {
    state: Mutex<LedgerState>,
    alert_threshold: f64,
}

impl BudgetLedger {
    #[must_use]
    pub fn new(limit: Cost, alert_threshold: f64) -> Self {
        Self::with_committed(limit, alert_threshold, Cost::ZERO, Cost::ZERO)
    }

    /// Resume a ledger whose window already carries spend.
    ///
    /// `committed` is kept as is even above `limit`; such a ledger refuses
    /// every reservation.
    #[must_use]
    pub fn with_committed(limit: Cost, alert_threshold: f64, committed: Cost, overrun: Cost) -> Self {
        let ledger = Self {
            state: Mutex::new(LedgerState {
                limit,
                committed,
                reserved: Cost::ZERO,
                overrun,
                reservations: HashMap::new(),
                next_id: 1,
                alert_fired: false,
            }),
            alert_threshold,
        };
        {
            let mut state = ledger.lock();
            ledger.check_alert(&mut state);
        }
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Mutations never panic midway, so poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold `amount` against the budget.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::BudgetExceeded` if `committed + reserved + amount`
    /// would exceed the limit. Nothing is held in that case.
    pub fn reserve(&self, amount: Cost) -> Result<ReservationId, LedgerError> {
        let mut state = self.lock();
        let available = state.limit - state.committed - state.reserved;
        let fits = state
            .committed
            .checked_add(state.reserved)
            .and_then(|held| held.checked_add(amount))
            .is_some_and(|total| total <= state.limit);
        if !fits {
            debug!(requested = %amount, available = %available, "Reservation refused");
            return Err(LedgerError::BudgetExceeded {
                requested: amount,
                available,
                limit: state.limit,
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.reserved = state.reserved + amount;
        state.reservations.insert(id, amount);
        debug!(reservation = id, amount = %amount, reserved = %state.reserved, "Budget reserved");
        self.check_alert(&mut state);
        Ok(ReservationId(id))
    }

    /// Settle a reservation at its actual cost.
    ///
    /// Actual cost above the remaining headroom is not charged; it is recorded
    /// and logged as an overrun so `committed` never exceeds the limit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownReservation` if the id was already settled.
    pub fn commit(&self, id: ReservationId, actual: Cost) -> Result<CommitReceipt, LedgerError> {
        let mut state = self.lock();
        let estimate = state
            .reservations
            .remove(&id.0)
            .ok_or(LedgerError::UnknownReservation(id.0))?;
        state.reserved = state.reserved - estimate;

        let headroom = state.limit - state.committed - state.reserved;
        let charged = actual.min(headroom);
        let overrun = actual - charged;
        state.committed = state.committed + charged;

        if overrun.is_zero() {
            debug!(reservation = id.0, estimate = %estimate, actual = %actual, "Budget committed");
        } else {
            state.overrun = state.overrun + overrun;
            warn!(
                reservation = id.0,
                estimate = %estimate,
                actual = %actual,
                overrun = %overrun,
                limit = %state.limit,
                "Actual cost exceeded the budget; overrun recorded"
            );
        }
        self.check_alert(&mut state);
        Ok(CommitReceipt { charged, overrun })
    }

    /// Release a reservation without charging anything.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownReservation` if the id was already settled.
    pub fn rollback(&self, id: ReservationId) -> Result<Cost, LedgerError> {
        let mut state = self.lock();
        let estimate = state
            .reservations
            .remove(&id.0)
            .ok_or(LedgerError::UnknownReservation(id.0))?;
        state.reserved = state.reserved - estimate;
        debug!(reservation = id.0, released = %estimate, "Budget reservation rolled back");
        Ok(estimate)
    }

    /// Operator override of the limit. May leave the ledger over its new limit.
    pub fn override_limit(&self, new_limit: Cost, note: &str) {
        let mut state = self.lock();
        warn!(
            old_limit = %state.limit,
            new_limit = %new_limit,
            committed = %state.committed,
            reserved = %state.reserved,
            note = %note,
            "Budget limit overridden by operator"
        );
        state.limit = new_limit;
        state.alert_fired = false;
        self.check_alert(&mut state);
    }

    #[must_use]
    pub fn remaining(&self) -> Cost {
        let state = self.lock();
        state.limit - state.committed - state.reserved
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            limit: state.limit,
            committed: state.committed,
            reserved: state.reserved,
            overrun: state.overrun,
            alert_threshold: self.alert_threshold,
            alert_fired: state.alert_fired,
            outstanding_reservations: state.reservations.len(),
        }
    }

    fn check_alert(&self, state: &mut LedgerState) {
        if state.alert_fired || state.limit.is_zero() {
            return;
        }
        let used = (state.committed + state.reserved).as_units();
        let ratio = used / state.limit.as_units();
        if ratio >= self.alert_threshold {
            state.alert_fired = true;
            warn!(
                committed = %state.committed,
                reserved = %state.reserved,
                limit = %state.limit,
                threshold = self.alert_threshold,
                "Budget alert threshold reached"
            );
        } else {
            debug!(used_ratio = ratio, "Budget usage");
        }
    }
}
