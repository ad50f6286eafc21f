// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Partitioned record store collaborator.
//!
//! The rate limiter and the subscription state machine both persist into a
//! generic partitioned key-value store: point lookups, upsert, delete, and
//! range scans filtered by partition key and a comparable timestamp field.
//! Whether the backing engine is a managed table service, a relational
//! table, or the in-memory store below is an implementation choice; the
//! core only sees this trait.

use crate::clock::Clock;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A single stored row.
///
/// `timestamp` is stamped by the store on every write; a caller-supplied
/// value is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub partition: String,
    pub row: String,
    pub timestamp: DateTime<Utc>,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StoredRecord {
    /// New record with empty fields. The timestamp is a placeholder until
    /// the store stamps it on write.
    pub fn new(partition: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            row: row.into(),
            timestamp: DateTime::<Utc>::MIN_UTC,
            fields: serde_json::Map::new(),
        }
    }

    /// Read a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// Set a field, consuming and returning self for chaining.
    pub fn with_field(mut self, name: &str, value: serde_json::Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Partitioned record store with point and range access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Ensure the named table exists. Idempotent.
    async fn create_if_absent(&self, table: &str) -> Result<(), StoreError>;

    /// Point lookup by (partition, row).
    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Insert or overwrite a row.
    async fn upsert(&self, table: &str, record: StoredRecord) -> Result<(), StoreError>;

    /// Insert a new row; fails with `Conflict` if the row key exists.
    async fn insert(&self, table: &str, record: StoredRecord) -> Result<(), StoreError>;

    /// Delete a row. Deleting an absent row is not an error.
    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<(), StoreError>;

    /// Rows in a partition whose store timestamp is at or after `cutoff`.
    async fn query_partition_since(
        &self,
        table: &str,
        partition: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Rows across the whole table whose store timestamp is before `cutoff`.
    async fn scan_older_than(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

type Table = BTreeMap<(String, String), StoredRecord>;

/// In-memory record store.
///
/// Tables are sorted maps keyed by (partition, row), so partition scans
/// walk rows in row-key order. Timestamps come from the injected clock.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_if_absent(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|t| t.get(&(partition.to_string(), row.to_string())))
            .cloned())
    }

    async fn upsert(&self, table: &str, mut record: StoredRecord) -> Result<(), StoreError> {
        record.timestamp = self.clock.now();
        let mut tables = self.tables.write().await;
        let t = tables.entry(table.to_string()).or_default();
        t.insert((record.partition.clone(), record.row.clone()), record);
        Ok(())
    }

    async fn insert(&self, table: &str, mut record: StoredRecord) -> Result<(), StoreError> {
        record.timestamp = self.clock.now();
        let mut tables = self.tables.write().await;
        let t = tables.entry(table.to_string()).or_default();
        let key = (record.partition.clone(), record.row.clone());
        if t.contains_key(&key) {
            return Err(StoreError::Conflict {
                partition: record.partition,
                row: record.row,
            });
        }
        t.insert(key, record);
        Ok(())
    }

    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get_mut(table) {
            t.remove(&(partition.to_string(), row.to_string()));
        }
        Ok(())
    }

    async fn query_partition_since(
        &self,
        table: &str,
        partition: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let tables = self.tables.read().await;
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let lower = (partition.to_string(), String::new());
        Ok(t.range(lower..)
            .take_while(|((p, _), _)| p == partition)
            .filter(|(_, r)| r.timestamp >= cutoff)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn scan_older_than(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let tables = self.tables.read().await;
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.values()
            .filter(|r| r.timestamp < cutoff)
            .cloned()
            .collect())
    }
}
