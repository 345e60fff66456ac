//! Applies decrypted snapshots to the local record store.
//!
//! Snapshots are applied oldest first, each inside its own transaction.
//! Within a snapshot, parent types listed in the merge order go first and
//! the remaining types follow alphabetically. Rows are last-write-wins by
//! modification time; an incoming row that is not strictly newer becomes a
//! [`SyncConflict`] and the stored row is left alone.

use chrono::{NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::records::{RecordStore, RecordTransaction, RecordTypeDescriptor, Row};
use crate::sync::backup::parse_snapshot_name;
use crate::sync::codec::{CryptoCodec, EncryptedEnvelope};
use crate::sync::conflict::SyncConflict;
use crate::sync::snapshot::SnapshotPayload;

/// Default rows per insert/update batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// One snapshot file handed to the merge.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    pub file_name: String,
    pub envelope: EncryptedEnvelope,
    pub timestamp: Option<NaiveDateTime>,
}

impl SnapshotFile {
    /// Takes the timestamp from the file name.
    pub fn new(file_name: impl Into<String>, envelope: EncryptedEnvelope) -> Self {
        let file_name = file_name.into();
        let timestamp = parse_snapshot_name(&file_name);
        Self {
            file_name,
            envelope,
            timestamp,
        }
    }
}

/// Result of one [`MergeEngine::merge`] call.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// True when every snapshot was applied.
    pub success: bool,
    pub conflicts: Vec<SyncConflict>,
    /// Snapshots applied and committed, in application order.
    pub processed_files: Vec<String>,
    /// Snapshots rolled back or unreadable, with the reason.
    pub failed_files: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct SnapshotStats {
    inserted: usize,
    updated: usize,
    conflicts: Vec<SyncConflict>,
}

/// Transactional snapshot merge.
pub struct MergeEngine {
    store: Arc<dyn RecordStore>,
    codec: CryptoCodec,
    batch_size: usize,
    merge_order: Vec<String>,
    excluded: HashSet<String>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RecordStore>, codec: CryptoCodec) -> Self {
        Self {
            store,
            codec,
            batch_size: DEFAULT_BATCH_SIZE,
            merge_order: Vec::new(),
            excluded: HashSet::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Types applied before all others, in this order.
    pub fn with_merge_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.merge_order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_excluded_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = types.into_iter().map(Into::into).collect();
        self
    }

    /// Apply `snapshots` oldest first. A snapshot that cannot be decrypted
    /// or whose transaction fails is rolled back and reported in
    /// `failed_files`; the remaining snapshots are still applied.
    pub async fn merge(&self, mut snapshots: Vec<SnapshotFile>) -> MergeOutcome {
        snapshots.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        let mut outcome = MergeOutcome::default();
        for snapshot in &snapshots {
            match self.merge_one(snapshot).await {
                Ok(stats) => {
                    tracing::info!(
                        snapshot = %snapshot.file_name,
                        inserted = stats.inserted,
                        updated = stats.updated,
                        conflicts = stats.conflicts.len(),
                        "merged snapshot"
                    );
                    outcome.conflicts.extend(stats.conflicts);
                    outcome.processed_files.push(snapshot.file_name.clone());
                }
                Err(e) => {
                    tracing::warn!(snapshot = %snapshot.file_name, error = %e, "snapshot not merged");
                    outcome
                        .failed_files
                        .push((snapshot.file_name.clone(), e.to_string()));
                }
            }
        }

        outcome.success = outcome.failed_files.is_empty();
        outcome
    }

    async fn merge_one(&self, snapshot: &SnapshotFile) -> SyncResult<SnapshotStats> {
        let payload = self.codec.open_payload(&snapshot.envelope)?;
        let mut tx = self.store.begin().await.map_err(SyncError::transaction)?;

        match self.apply(tx.as_mut(), &payload, &snapshot.file_name).await {
            Ok(stats) => {
                tx.commit().await.map_err(SyncError::transaction)?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(snapshot = %snapshot.file_name, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Type names of `payload` in application order.
    fn ordered_types<'a>(&self, payload: &'a SnapshotPayload) -> Vec<&'a str> {
        let mut ordered: Vec<&str> = self
            .merge_order
            .iter()
            .filter_map(|name| payload.get_key_value(name.as_str()).map(|(k, _)| k.as_str()))
            .collect();
        for name in payload.keys() {
            if !ordered.contains(&name.as_str()) {
                ordered.push(name.as_str());
            }
        }
        ordered
            .into_iter()
            .filter(|name| !self.excluded.contains(*name))
            .collect()
    }

    async fn apply(
        &self,
        tx: &mut dyn RecordTransaction,
        payload: &SnapshotPayload,
        snapshot: &str,
    ) -> SyncResult<SnapshotStats> {
        let mut stats = SnapshotStats::default();

        for record_type in self.ordered_types(payload) {
            let Some(descriptor) = self.store.descriptor(record_type) else {
                tracing::warn!(record_type, snapshot, "unknown record type in snapshot, skipped");
                continue;
            };
            let rows = payload.get(record_type).map(Vec::as_slice).unwrap_or_default();

            for chunk in rows.chunks(self.batch_size) {
                self.apply_chunk(tx, &descriptor, chunk, snapshot, &mut stats)
                    .await?;
                tokio::task::yield_now().await;
            }
        }

        Ok(stats)
    }

    async fn apply_chunk(
        &self,
        tx: &mut dyn RecordTransaction,
        descriptor: &RecordTypeDescriptor,
        chunk: &[Row],
        snapshot: &str,
        stats: &mut SnapshotStats,
    ) -> SyncResult<()> {
        let mut ids: Vec<String> = chunk.iter().filter_map(|r| descriptor.id_of(r)).collect();
        ids.sort();
        ids.dedup();

        let mut existing: HashMap<String, Row> = tx
            .find_by_ids(&descriptor.name, &ids)
            .await
            .map_err(SyncError::transaction)?
            .into_iter()
            .filter_map(|row| descriptor.id_of(&row).map(|id| (id, row)))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for row in chunk {
            let Some(id) = descriptor.id_of(row) else {
                tracing::warn!(record_type = %descriptor.name, snapshot, "row without primary key, skipped");
                continue;
            };

            match existing.get(&id) {
                None => inserts.push(row.clone()),
                Some(local) => {
                    let newer = match (descriptor.modified_of(row), descriptor.modified_of(local)) {
                        (Some(incoming), Some(stored)) => incoming > stored,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };
                    if newer {
                        updates.push(row.clone());
                    } else {
                        tracing::info!(record_type = %descriptor.name, id = %id, snapshot, "conflict, keeping local row");
                        stats.conflicts.push(SyncConflict {
                            record_type: descriptor.name.clone(),
                            record_id: Some(id),
                            local: local.clone(),
                            remote: row.clone(),
                            detected_at: Utc::now(),
                            snapshot: Some(snapshot.to_string()),
                        });
                        continue;
                    }
                }
            }
            existing.insert(id, row.clone());
        }

        if !inserts.is_empty() {
            stats.inserted += inserts.len();
            tx.insert_batch(&descriptor.name, inserts)
                .await
                .map_err(SyncError::transaction)?;
        }
        if !updates.is_empty() {
            stats.updated += updates.len();
            tx.save_batch(&descriptor.name, updates)
                .await
                .map_err(SyncError::transaction)?;
        }
        Ok(())
    }

    /// Write rows unconditionally in one transaction. Used when a conflict
    /// is resolved in favour of the remote row.
    pub async fn overwrite(&self, record_type: &str, rows: Vec<Row>) -> SyncResult<()> {
        let mut tx = self.store.begin().await.map_err(SyncError::transaction)?;
        match tx.save_batch(record_type, rows).await {
            Ok(()) => tx.commit().await.map_err(SyncError::transaction),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(record_type, error = %rollback, "rollback failed");
                }
                Err(SyncError::transaction(e))
            }
        }
    }
}
