// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Retention sweeper for the rate-limit table.
//!
//! Admitted-attempt rows are append-only and only ever removed here, off
//! the request-serving path. A failure to delete one row is logged and
//! skipped; the sweep carries on.

use crate::clock::Clock;
use crate::error::Result;
use crate::limiter::RATE_LIMIT_TABLE;
use crate::store::RecordStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes rate-limit rows older than the retention cutoff.
pub struct RetentionSweeper {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    cutoff: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, cutoff_minutes: i64) -> Self {
        Self {
            store,
            clock,
            cutoff: Duration::minutes(cutoff_minutes),
        }
    }

    /// One best-effort cleanup pass over rows older than the cutoff.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.store.create_if_absent(RATE_LIMIT_TABLE).await?;
        let cutoff = self.clock.now() - self.cutoff;

        let stale = self.store.scan_older_than(RATE_LIMIT_TABLE, cutoff).await?;
        let mut report = SweepReport {
            scanned: stale.len(),
            ..Default::default()
        };

        for row in stale {
            match self
                .store
                .delete(RATE_LIMIT_TABLE, &row.partition, &row.row)
                .await
            {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(
                        partition = %row.partition,
                        row = %row.row,
                        error = %err,
                        "sweep could not delete row, skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "rate-limit retention sweep complete"
        );
        Ok(report)
    }
}
