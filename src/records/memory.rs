//! In-memory relational store.
//!
//! Used by the CLI (persisted as one JSON document) and by tests. A
//! transaction holds the table lock for its whole lifetime and writes
//! into a private copy that replaces the tables on commit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RecordStore, RecordTransaction, RecordTypeDescriptor, Row};

type Table = BTreeMap<String, Row>;
type Tables = BTreeMap<String, Table>;

/// Relational store kept entirely in memory.
pub struct MemoryRecordStore {
    descriptors: Vec<RecordTypeDescriptor>,
    tables: Arc<Mutex<Tables>>,
    failing_types: Arc<SyncMutex<HashSet<String>>>,
}

impl MemoryRecordStore {
    /// Create a store with the given record types and no rows.
    pub fn new(descriptors: Vec<RecordTypeDescriptor>) -> Self {
        let tables = descriptors
            .iter()
            .map(|d| (d.name.clone(), Table::new()))
            .collect();
        Self {
            descriptors,
            tables: Arc::new(Mutex::new(tables)),
            failing_types: Arc::new(SyncMutex::new(HashSet::new())),
        }
    }

    /// Load rows from a JSON document shaped like a snapshot payload
    /// (`{ "<type>": [row, ...] }`). Missing files yield an empty store.
    pub async fn load_json(descriptors: Vec<RecordTypeDescriptor>, path: &Path) -> Result<Self> {
        let store = Self::new(descriptors);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read records file: {}", path.display()))
            }
        };

        let payload: BTreeMap<String, Vec<Row>> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid records file: {}", path.display()))?;
        for (record_type, rows) in payload {
            store.put_rows(&record_type, rows).await?;
        }
        Ok(store)
    }

    /// Write every table to `path` in the format read by [`load_json`](Self::load_json).
    pub async fn save_json(&self, path: &Path) -> Result<()> {
        let payload: BTreeMap<String, Vec<Row>> = {
            let tables = self.tables.lock().await;
            tables
                .iter()
                .map(|(name, table)| (name.clone(), table.values().cloned().collect()))
                .collect()
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&payload)?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write records file: {}", path.display()))?;
        Ok(())
    }

    /// Insert or overwrite rows outside of any transaction.
    pub async fn put_rows(&self, record_type: &str, rows: Vec<Row>) -> Result<()> {
        let descriptor = self.require(record_type)?;
        let mut tables = self.tables.lock().await;
        let table = tables.entry(record_type.to_string()).or_default();
        for row in rows {
            let id = descriptor
                .id_of(&row)
                .with_context(|| format!("Row in {} has no primary key", record_type))?;
            table.insert(id, row);
        }
        Ok(())
    }

    /// Fetch one row by primary key.
    pub async fn get(&self, record_type: &str, id: &str) -> Option<Row> {
        self.tables.lock().await.get(record_type)?.get(id).cloned()
    }

    /// Number of rows of one type.
    pub async fn count(&self, record_type: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(record_type)
            .map_or(0, BTreeMap::len)
    }

    /// Make every write to `record_type` fail until cleared.
    pub fn fail_writes_for(&self, record_type: &str) {
        self.failing_types.lock().insert(record_type.to_string());
    }

    /// Undo [`fail_writes_for`](Self::fail_writes_for).
    pub fn clear_write_failures(&self) {
        self.failing_types.lock().clear();
    }

    fn require(&self, record_type: &str) -> Result<RecordTypeDescriptor> {
        match self.descriptor(record_type) {
            Some(d) => Ok(d),
            None => bail!("Unknown record type: {}", record_type),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn record_types(&self) -> Vec<RecordTypeDescriptor> {
        self.descriptors.clone()
    }

    async fn find_all(&self, record_type: &str) -> Result<Vec<Row>> {
        self.require(record_type)?;
        let tables = self.tables.lock().await;
        Ok(tables
            .get(record_type)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_modified_since(&self, record_type: &str, since: DateTime<Utc>) -> Result<Vec<Row>> {
        let descriptor = self.require(record_type)?;
        let tables = self.tables.lock().await;
        Ok(tables
            .get(record_type)
            .map(|t| {
                t.values()
                    .filter(|row| descriptor.modified_of(row).is_some_and(|ts| ts > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            descriptors: self.descriptors.clone(),
            failing_types: self.failing_types.clone(),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    descriptors: Vec<RecordTypeDescriptor>,
    failing_types: Arc<SyncMutex<HashSet<String>>>,
}

impl MemoryTransaction {
    fn descriptor(&self, record_type: &str) -> Result<&RecordTypeDescriptor> {
        match self.descriptors.iter().find(|d| d.name == record_type) {
            Some(d) => Ok(d),
            None => bail!("Unknown record type: {}", record_type),
        }
    }

    fn check_writable(&self, record_type: &str) -> Result<()> {
        if self.failing_types.lock().contains(record_type) {
            bail!("Write to {} rejected by store", record_type);
        }
        Ok(())
    }

    fn keyed(&self, record_type: &str, rows: Vec<Row>) -> Result<Vec<(String, Row)>> {
        let descriptor = self.descriptor(record_type)?;
        rows.into_iter()
            .map(|row| {
                let id = descriptor
                    .id_of(&row)
                    .with_context(|| format!("Row in {} has no primary key", record_type))?;
                Ok((id, row))
            })
            .collect()
    }
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn find_by_ids(&mut self, record_type: &str, ids: &[String]) -> Result<Vec<Row>> {
        self.descriptor(record_type)?;
        let Some(table) = self.working.get(record_type) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn insert_batch(&mut self, record_type: &str, rows: Vec<Row>) -> Result<()> {
        self.check_writable(record_type)?;
        let keyed = self.keyed(record_type, rows)?;
        let table = self.working.entry(record_type.to_string()).or_default();
        for (id, row) in keyed {
            if table.contains_key(&id) {
                bail!("Duplicate primary key {} in {}", id, record_type);
            }
            table.insert(id, row);
        }
        Ok(())
    }

    async fn save_batch(&mut self, record_type: &str, rows: Vec<Row>) -> Result<()> {
        self.check_writable(record_type)?;
        let keyed = self.keyed(record_type, rows)?;
        let table = self.working.entry(record_type.to_string()).or_default();
        for (id, row) in keyed {
            table.insert(id, row);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Build a row from a JSON literal. Non-object values yield an empty row.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
