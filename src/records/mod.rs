//! Contract with the host's relational store.
//!
//! The engine only needs to enumerate record types, query rows by
//! modification time, and apply batches inside a transaction. Rows are
//! plain JSON objects so any store that can map its entities to JSON can
//! take part.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use memory::MemoryRecordStore;

/// One record as exchanged in snapshots.
pub type Row = Map<String, Value>;

/// Describes one syncable record type (a table, an entity class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeDescriptor {
    /// Type name used as key in snapshot payloads.
    pub name: String,
    /// Column holding the primary key.
    pub primary_key: String,
    /// Column holding the last-modification timestamp.
    pub modified_column: String,
}

impl RecordTypeDescriptor {
    /// Descriptor with the conventional `id` / `updateTime` columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            modified_column: "updateTime".to_string(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_modified_column(mut self, column: impl Into<String>) -> Self {
        self.modified_column = column.into();
        self
    }

    /// Primary key of `row` rendered as a string.
    pub fn id_of(&self, row: &Row) -> Option<String> {
        match row.get(&self.primary_key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Modification time of `row`.
    pub fn modified_of(&self, row: &Row) -> Option<DateTime<Utc>> {
        row.get(&self.modified_column).and_then(value_timestamp)
    }
}

/// Read side of the relational store plus the entry point to transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every registered record type.
    fn record_types(&self) -> Vec<RecordTypeDescriptor>;

    /// Every row of one type.
    async fn find_all(&self, record_type: &str) -> Result<Vec<Row>>;

    /// Rows whose modification time is strictly after `since`.
    async fn find_modified_since(&self, record_type: &str, since: DateTime<Utc>) -> Result<Vec<Row>>;

    /// Open an exclusive transaction.
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>>;

    /// Look up a descriptor by type name.
    fn descriptor(&self, record_type: &str) -> Option<RecordTypeDescriptor> {
        self.record_types().into_iter().find(|d| d.name == record_type)
    }
}

/// An open transaction. Dropping it without [`commit`](Self::commit)
/// discards every write made through it.
#[async_trait]
pub trait RecordTransaction: Send {
    /// Rows of `record_type` whose primary key is in `ids`.
    async fn find_by_ids(&mut self, record_type: &str, ids: &[String]) -> Result<Vec<Row>>;

    /// Insert new rows.
    async fn insert_batch(&mut self, record_type: &str, rows: Vec<Row>) -> Result<()>;

    /// Overwrite existing rows.
    async fn save_batch(&mut self, record_type: &str, rows: Vec<Row>) -> Result<()>;

    /// Make every write visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Parse a stored timestamp into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (read as UTC), the same
/// with a `T` separator and no offset, and integer epoch milliseconds.
pub fn normalize_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Some(stripped) = raw.strip_suffix(" UTC") {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Timestamp held in a JSON value (string or epoch milliseconds).
pub fn value_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => normalize_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Canonical textual form used when timestamps are persisted.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
