//! Record conflicts found while merging snapshots.
//!
//! A conflict is data, not an error: the local row is kept and the pair is
//! appended to a per-provider log in the keyed state store until someone
//! resolves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::records::Row;
use crate::state::KeyValueStore;

/// An incoming row that was not newer than the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Record type (table) name.
    pub record_type: String,
    pub record_id: Option<String>,
    /// Stored row at detection time.
    pub local: Row,
    /// Incoming row that lost.
    pub remote: Row,
    pub detected_at: DateTime<Utc>,
    /// Snapshot file the remote row came from.
    #[serde(default)]
    pub snapshot: Option<String>,
}

/// How to settle a logged conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Leave the stored row as it is.
    KeepLocal,
    /// Overwrite the stored row with the remote one.
    UseRemote,
}

impl ConflictResolution {
    pub fn description(&self) -> &'static str {
        match self {
            Self::KeepLocal => "Keep the local record",
            Self::UseRemote => "Overwrite with the remote record",
        }
    }
}

/// Persisted list of unresolved conflicts for one provider.
pub struct ConflictLog {
    state: Arc<dyn KeyValueStore>,
    provider: String,
}

impl ConflictLog {
    pub fn new(state: Arc<dyn KeyValueStore>, provider: impl Into<String>) -> Self {
        Self {
            state,
            provider: provider.into(),
        }
    }

    pub fn state_key(provider: &str) -> String {
        format!("sync.{}.conflicts", provider)
    }

    /// Every logged conflict, oldest first.
    pub fn list(&self) -> SyncResult<Vec<SyncConflict>> {
        match self.state.get(&Self::state_key(&self.provider)) {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                SyncError::State(format!("conflict log for {} is unreadable: {}", self.provider, e))
            }),
            None => Ok(Vec::new()),
        }
    }

    pub fn append(&self, conflicts: &[SyncConflict]) -> SyncResult<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let mut all = self.list()?;
        all.extend_from_slice(conflicts);
        self.store(&all)
    }

    /// Remove and return the conflict at `index`.
    pub fn take(&self, index: usize) -> SyncResult<SyncConflict> {
        let mut all = self.list()?;
        if index >= all.len() {
            return Err(SyncError::State(format!(
                "no conflict #{} (log has {})",
                index,
                all.len()
            )));
        }
        let conflict = all.remove(index);
        self.store(&all)?;
        Ok(conflict)
    }

    pub fn clear(&self) -> SyncResult<()> {
        self.state.delete(&Self::state_key(&self.provider))
    }

    fn store(&self, conflicts: &[SyncConflict]) -> SyncResult<()> {
        if conflicts.is_empty() {
            return self.clear();
        }
        self.state.set(
            &Self::state_key(&self.provider),
            serde_json::to_value(conflicts)?,
        )
    }
}
