// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus counters for admission decisions and sweeper activity.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Admission outcome labels.
pub const OUTCOME_ALLOWED: &str = "allowed";
pub const OUTCOME_GATE_DENIED: &str = "gate_denied";
pub const OUTCOME_RATE_DENIED: &str = "rate_denied";

/// Registry and counters owned by the service.
#[derive(Clone)]
pub struct GuardMetrics {
    registry: Registry,
    admissions: IntCounterVec,
    sweeper_deleted: IntCounter,
    sweeper_failed: IntCounter,
}

impl GuardMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let admissions = IntCounterVec::new(
            Opts::new("guard_admissions_total", "Admission decisions by action and outcome"),
            &["action", "outcome"],
        )?;
        let sweeper_deleted = IntCounter::new(
            "guard_sweeper_rows_deleted_total",
            "Rate-limit rows removed by the retention sweeper",
        )?;
        let sweeper_failed = IntCounter::new(
            "guard_sweeper_rows_failed_total",
            "Rate-limit rows the sweeper failed to remove",
        )?;

        registry.register(Box::new(admissions.clone()))?;
        registry.register(Box::new(sweeper_deleted.clone()))?;
        registry.register(Box::new(sweeper_failed.clone()))?;

        Ok(Self {
            registry,
            admissions,
            sweeper_deleted,
            sweeper_failed,
        })
    }

    pub fn record_admission(&self, action: &str, outcome: &str) {
        self.admissions.with_label_values(&[action, outcome]).inc();
    }

    pub fn record_sweep(&self, deleted: usize, failed: usize) {
        self.sweeper_deleted.inc_by(deleted as u64);
        self.sweeper_failed.inc_by(failed as u64);
    }

    /// Text exposition format for the metrics endpoint.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
