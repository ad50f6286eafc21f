// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding-window rate limiter backed by the shared record store.
//!
//! Each admitted attempt appends one immutable row to the `RateLimit`
//! table, partitioned by bucket key; an attempt is admitted while the
//! number of rows younger than the window stays below the limit. Denied
//! attempts append nothing.
//!
//! The count-then-insert sequence is not atomic. Concurrent callers on the
//! same bucket can both observe a count below the limit and both insert,
//! so the effective limit can be exceeded by up to the concurrency degree.
//! That is an accepted property of the store's consistency model, tested
//! as a bound rather than papered over; a store offering conditional
//! increments would allow strict enforcement.

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{RecordStore, StoredRecord};
use chrono::Duration;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Table holding one row per admitted attempt.
pub const RATE_LIMIT_TABLE: &str = "RateLimit";

/// Store-backed sliding-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    /// Last issued row sequence, in nanoseconds since the Unix epoch.
    /// Advanced monotonically so two admissions in the same instant still
    /// get distinct row keys.
    last_sequence: AtomicI64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            last_sequence: AtomicI64::new(0),
        }
    }

    /// Decide whether `key` may perform `action` now, given a budget of
    /// `limit` attempts per `window`. Admission appends exactly one row;
    /// denial appends none.
    pub async fn allow(
        &self,
        key: &str,
        action: &str,
        limit: usize,
        window: Duration,
    ) -> Result<bool> {
        self.store.create_if_absent(RATE_LIMIT_TABLE).await?;

        let cutoff = self.clock.now() - window;
        let recent = self
            .store
            .query_partition_since(RATE_LIMIT_TABLE, key, cutoff)
            .await?;

        if recent.len() >= limit {
            debug!(key, action, count = recent.len(), limit, "rate limit denial");
            return Ok(false);
        }

        let row = format!("{:019}", self.next_sequence());
        self.store
            .insert(RATE_LIMIT_TABLE, StoredRecord::new(key, row))
            .await?;
        debug!(key, action, count = recent.len() + 1, limit, "rate limit admission");
        Ok(true)
    }

    /// Next row sequence: the current high-resolution timestamp, bumped
    /// past the previously issued value if the clock has not advanced.
    fn next_sequence(&self) -> i64 {
        let now_nanos = self
            .clock
            .now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX - 1);
        self.last_sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_nanos.max(last + 1))
            })
            .map(|last| now_nanos.max(last + 1))
            .unwrap_or(now_nanos)
    }
}
