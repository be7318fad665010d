//! Persistence of the budget window between runs.
//!
//! Only settled spend is stored. Reservations live and die with the process.
//! A run that spends from the window holds its [`WindowLock`] from load to
//! save, so concurrent runs take turns instead of overwriting each other.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use fd_lock::{RwLock, RwLockWriteGuard};
use phaseline_utils::atomic_write::write_file_atomic;
use phaseline_utils::{Cost, LedgerError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use tracing::{debug, info};

use crate::BudgetLedger;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerWindow {
    pub window_start: DateTime<Utc>,
    pub window_hours: u64,
    pub limit: Cost,
    pub committed: Cost,
    #[serde(default)]
    pub overrun: Cost,
}

impl LedgerWindow {
    #[must_use]
    pub fn start(now: DateTime<Utc>, window_hours: u64, limit: Cost) -> Self {
        Self {
            window_start: now,
            window_hours,
            limit,
            committed: Cost::ZERO,
            overrun: Cost::ZERO,
        }
    }

    /// `None` when the window is too long to represent, i.e. never ends.
    #[must_use]
    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        let hours = i64::try_from(self.window_hours).ok()?;
        self.window_start
            .checked_add_signed(Duration::try_hours(hours)?)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_end().is_some_and(|end| now >= end)
    }

    /// Load the window at `path`, starting a fresh one if the file is absent
    /// or the stored window has ended. The configured limit always wins over
    /// the stored one; stored spend is kept even when it exceeds that limit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Persistence` if the file exists but is unreadable.
    pub fn load_or_start(
        path: &Utf8Path,
        now: DateTime<Utc>,
        window_hours: u64,
        limit: Cost,
    ) -> Result<Self, LedgerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::start(now, window_hours, limit));
            }
            Err(e) => return Err(LedgerError::Persistence(format!("{path}: {e}"))),
        };
        let mut window: LedgerWindow = serde_json::from_str(&content)
            .map_err(|e| LedgerError::Persistence(format!("{path}: {e}")))?;

        if window.is_expired(now) {
            info!(
                window_start = %window.window_start,
                committed = %window.committed,
                "Budget window ended; starting a new one"
            );
            return Ok(Self::start(now, window_hours, limit));
        }
        window.window_hours = window_hours;
        window.limit = limit;
        Ok(window)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        write_file_atomic(path, &json).map_err(|e| LedgerError::Persistence(format!("{e:#}")))
    }

    #[must_use]
    pub fn to_ledger(&self, alert_threshold: f64) -> BudgetLedger {
        BudgetLedger::with_committed(self.limit, alert_threshold, self.committed, self.overrun)
    }

    /// Copy settled spend from `ledger` back into the window.
    pub fn record(&mut self, ledger: &BudgetLedger) {
        let snap = ledger.snapshot();
        self.committed = snap.committed;
        self.overrun = snap.overrun;
    }
}

/// Exclusive claim on a budget window file.
///
/// The lock lives on a sibling `<window>.lock` file so the window itself can
/// still be replaced atomically on save.
#[derive(Debug)]
pub struct WindowLock {
    path: Utf8PathBuf,
    lock: RwLock<File>,
}

impl WindowLock {
    /// Open (creating if needed) the lock file next to `window_path`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Persistence` if the lock file cannot be created.
    pub fn open(window_path: &Utf8Path) -> Result<Self, LedgerError> {
        if let Some(parent) = window_path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Persistence(format!("{parent}: {e}")))?;
        }
        let path = Utf8PathBuf::from(format!("{window_path}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LedgerError::Persistence(format!("{path}: {e}")))?;
        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Take the lock, waiting for any other run that holds it.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Persistence` if the lock cannot be taken.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, LedgerError> {
        let busy = self.lock.try_write().is_err();
        if busy {
            info!(lock = %self.path, "Budget window in use by another run; waiting");
        }
        let guard = self
            .lock
            .write()
            .map_err(|e| LedgerError::Persistence(format!("{}: {e}", self.path)))?;
        debug!(lock = %self.path, "Budget window locked");
        Ok(guard)
    }

    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::WindowBusy` while another holder has it.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, LedgerError> {
        let path = self.path.to_string();
        self.lock
            .try_write()
            .map_err(|_| LedgerError::WindowBusy { path })
    }
}
