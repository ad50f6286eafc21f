// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Clock adapters for time operations.
//!
//! Every time-dependent component takes a [`Clock`] rather than calling
//! `Utc::now()` directly, so expiry and window arithmetic can be driven by
//! a controllable clock in tests.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
///
/// Clones share the same underlying time value, so advancing one clone is
/// visible through all of them.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self
            .current
            .lock()
            .expect("ManualClock mutex poisoned - a thread panicked while holding the lock");
        *current += by;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self
            .current
            .lock()
            .expect("ManualClock mutex poisoned - a thread panicked while holding the lock");
        *current = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current
            .lock()
            .expect("ManualClock mutex poisoned - a thread panicked while holding the lock")
    }
}
