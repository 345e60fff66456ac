//! Snapshot generation: collects record rows changed since a baseline.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::records::{canonical_timestamp, normalize_timestamp, RecordStore, Row};

/// Decrypted snapshot body: record type name to rows.
pub type SnapshotPayload = BTreeMap<String, Vec<Row>>;

/// Result of one [`SnapshotBuilder::build`] call.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub payload: SnapshotPayload,
    /// True when no baseline was given and every row was selected.
    pub is_full: bool,
    /// False only for an incremental snapshot that selected nothing.
    pub has_changes: bool,
    /// Canonical form of the baseline actually used, if any.
    pub baseline: Option<String>,
}

impl Snapshot {
    /// Total rows across all types.
    pub fn row_count(&self) -> usize {
        self.payload.values().map(Vec::len).sum()
    }
}

/// Builds full or incremental snapshots from a [`RecordStore`].
pub struct SnapshotBuilder {
    store: Arc<dyn RecordStore>,
    excluded: HashSet<String>,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            excluded: HashSet::new(),
        }
    }

    /// Record types that never take part in sync.
    pub fn with_excluded_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = types.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `record_type` is on the deny-list.
    pub fn is_excluded(&self, record_type: &str) -> bool {
        self.excluded.contains(record_type)
    }

    /// Select all rows (`baseline == None`) or rows modified strictly after
    /// the baseline. Empty per-type results are left out of the payload.
    ///
    /// A baseline that cannot be parsed is treated as absent, so the caller
    /// gets a full snapshot instead of silently skipping changes.
    pub async fn build(&self, baseline: Option<&str>) -> SyncResult<Snapshot> {
        let since: Option<DateTime<Utc>> = match baseline {
            Some(raw) => {
                let parsed = normalize_timestamp(raw);
                if parsed.is_none() {
                    tracing::warn!(baseline = raw, "unparsable baseline, building full snapshot");
                }
                parsed
            }
            None => None,
        };

        let mut payload = SnapshotPayload::new();
        for descriptor in self.store.record_types() {
            if self.is_excluded(&descriptor.name) {
                continue;
            }

            let rows = match since {
                Some(ts) => self.store.find_modified_since(&descriptor.name, ts).await,
                None => self.store.find_all(&descriptor.name).await,
            }
            .map_err(SyncError::transaction)?;

            if !rows.is_empty() {
                tracing::debug!(record_type = %descriptor.name, rows = rows.len(), "selected rows");
                payload.insert(descriptor.name.clone(), rows);
            }
        }

        let is_full = since.is_none();
        let has_changes = is_full || !payload.is_empty();
        Ok(Snapshot {
            payload,
            is_full,
            has_changes,
            baseline: since.map(canonical_timestamp),
        })
    }
}
