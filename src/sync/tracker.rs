//! Per-file sync bookkeeping.
//!
//! Each tracker owns the records of one (provider, direction, kind) and
//! persists them to the keyed state store after every mutation:
//!
//! * `fileSync.<provider>.<direction>.<kind>.records`: path to [`FileSyncInfo`]
//! * `fileSync.<provider>.<direction>.<kind>.failed`: paths to retry
//!
//! Failed paths are offered again on every run until they succeed.

use chrono::{DateTime, Utc};
use jwalk::{Parallelism, WalkDir};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::fs::LocalFs;
use crate::state::KeyValueStore;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::progress::SyncKey;

/// Outcome of the last attempt on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSyncStatus {
    Pending,
    Syncing,
    Success,
    Failed,
    Skipped,
}

impl FileSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Sync state of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSyncInfo {
    /// Forward-slash path relative to the tracked root.
    pub file_path: String,
    pub file_name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub sync_time: Option<DateTime<Utc>>,
    pub status: FileSyncStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub provider: String,
}

impl FileSyncInfo {
    /// A freshly scanned, not yet synced file.
    pub fn pending(
        file_path: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
        provider: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let file_name = file_path
            .rsplit('/')
            .next()
            .unwrap_or(file_path.as_str())
            .to_string();
        Self {
            file_path,
            file_name,
            size,
            last_modified,
            sync_time: None,
            status: FileSyncStatus::Pending,
            error: None,
            provider: provider.into(),
        }
    }
}

/// Durable per-file sync state for one tracker key.
pub struct FileChangeTracker {
    key: SyncKey,
    state: Arc<dyn KeyValueStore>,
    records: BTreeMap<String, FileSyncInfo>,
    failed: BTreeSet<String>,
    excludes: ExcludePatterns,
}

impl FileChangeTracker {
    /// Load the persisted state for `key`. Unreadable state is logged and
    /// replaced by an empty tracker.
    pub fn load(state: Arc<dyn KeyValueStore>, key: SyncKey) -> Self {
        let records = match state.get(&Self::records_key(&key)) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(tracker = %key, error = %e, "discarding unreadable file records");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        let failed = match state.get(&Self::failed_key(&key)) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(tracker = %key, error = %e, "discarding unreadable failed set");
                BTreeSet::new()
            }),
            None => BTreeSet::new(),
        };

        Self {
            key,
            state,
            records,
            failed,
            excludes: ExcludePatterns::with_defaults(),
        }
    }

    pub fn with_excludes(mut self, excludes: ExcludePatterns) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn records_key(key: &SyncKey) -> String {
        format!("fileSync.{}.records", key)
    }

    pub fn failed_key(key: &SyncKey) -> String {
        format!("fileSync.{}.failed", key)
    }

    pub fn key(&self) -> &SyncKey {
        &self.key
    }

    /// Walk `root` recursively and return every regular file as a
    /// `pending` entry, sorted by path. A missing root yields nothing.
    pub async fn scan(&self, root: &Path) -> SyncResult<Vec<FileSyncInfo>> {
        let root: PathBuf = root.to_path_buf();
        let excludes = self.excludes.clone();
        let provider = self.key.provider.clone();

        tokio::task::spawn_blocking(move || scan_tree(&root, &excludes, &provider))
            .await
            .map_err(|e| SyncError::State(format!("scan task failed: {}", e)))?
    }

    /// Files that need syncing: never recorded, or recorded before their
    /// last modification, plus every path in the failed set.
    pub fn files_to_sync(&self, scanned: &[FileSyncInfo]) -> Vec<FileSyncInfo> {
        let mut selected: Vec<FileSyncInfo> = scanned
            .iter()
            .filter(|file| {
                self.failed.contains(&file.file_path)
                    || match self.records.get(&file.file_path) {
                        None => true,
                        Some(record) => record
                            .sync_time
                            .map_or(true, |synced| synced < file.last_modified),
                    }
            })
            .cloned()
            .collect();

        let seen: BTreeSet<&str> = scanned.iter().map(|f| f.file_path.as_str()).collect();
        for path in &self.failed {
            if seen.contains(path.as_str()) {
                continue;
            }
            if let Some(record) = self.records.get(path) {
                selected.push(record.clone());
            }
        }
        selected
    }

    /// Store the outcome of one attempt and stamp the sync time.
    pub fn record_outcome(
        &mut self,
        file: &FileSyncInfo,
        status: FileSyncStatus,
        error: Option<String>,
    ) -> SyncResult<()> {
        let mut record = file.clone();
        record.status = status;
        record.error = error;
        record.sync_time = Some(Utc::now());

        match status {
            FileSyncStatus::Failed => {
                self.failed.insert(record.file_path.clone());
            }
            FileSyncStatus::Success => {
                self.failed.remove(&record.file_path);
            }
            _ => {}
        }

        self.records.insert(record.file_path.clone(), record);
        self.persist()
    }

    pub fn record(&self, path: &str) -> Option<&FileSyncInfo> {
        self.records.get(path)
    }

    pub fn is_failed(&self, path: &str) -> bool {
        self.failed.contains(path)
    }

    /// Records of every path in the failed set.
    pub fn failed_files(&self) -> Vec<FileSyncInfo> {
        self.failed
            .iter()
            .filter_map(|path| self.records.get(path).cloned())
            .collect()
    }

    /// Paths whose last recorded outcome is `success`.
    pub fn succeeded_paths(&self) -> BTreeSet<String> {
        self.records
            .values()
            .filter(|r| r.status == FileSyncStatus::Success)
            .map(|r| r.file_path.clone())
            .collect()
    }

    /// Wipe all persisted state for this key.
    pub fn clear(&mut self) -> SyncResult<()> {
        self.records.clear();
        self.failed.clear();
        self.state.delete(&Self::records_key(&self.key))?;
        self.state.delete(&Self::failed_key(&self.key))
    }

    fn persist(&self) -> SyncResult<()> {
        self.state.set(
            &Self::records_key(&self.key),
            serde_json::to_value(&self.records)?,
        )?;
        let failed: Vec<Value> = self
            .failed
            .iter()
            .map(|p| Value::String(p.clone()))
            .collect();
        self.state
            .set(&Self::failed_key(&self.key), Value::Array(failed))
    }
}

fn scan_tree(root: &Path, excludes: &ExcludePatterns, provider: &str) -> SyncResult<Vec<FileSyncInfo>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry_result in WalkDir::new(root)
        .parallelism(Parallelism::Serial)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true)
    {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(relative) = LocalFs::relative_key(root, &path) else {
            continue;
        };
        if excludes.is_excluded(&relative) {
            continue;
        }

        let meta = std::fs::metadata(&path).map_err(|e| SyncError::io(&path, e))?;
        let modified = LocalFs::modified_utc(&meta).unwrap_or_else(Utc::now);
        files.push(FileSyncInfo::pending(relative, meta.len(), modified, provider));
    }

    files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    Ok(files)
}
