//! Local snapshot files under `<storage_root>/db/<provider>/`.
//!
//! File names embed a random id and a local timestamp
//! (`<uuid>-<YYYYmmddHHMMSSfff>.json`). Ordering always uses the embedded
//! timestamp, never filesystem times, with the file name as tie-breaker.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::fs::LocalFs;
use crate::sync::codec::EncryptedEnvelope;

/// Default number of snapshots kept per provider.
pub const DEFAULT_RETENTION: usize = 20;

const STAMP_LEN: usize = 17;

/// One snapshot file, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupManifestEntry {
    pub file_name: String,
    pub size: u64,
    /// Embedded timestamp, `None` for names that do not follow the scheme.
    pub timestamp: Option<NaiveDateTime>,
}

impl BackupManifestEntry {
    pub fn new(file_name: impl Into<String>, size: u64) -> Self {
        let file_name = file_name.into();
        let timestamp = parse_snapshot_name(&file_name);
        Self {
            file_name,
            size,
            timestamp,
        }
    }
}

/// Sort entries oldest first.
pub fn sort_entries(entries: &mut [BackupManifestEntry]) {
    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
}

/// Whether `name` looks like a snapshot file.
pub fn is_snapshot_name(name: &str) -> bool {
    name.ends_with(".json") && !name.starts_with('.')
}

/// Build a snapshot file name.
pub fn snapshot_file_name(id: Uuid, timestamp: NaiveDateTime) -> String {
    format!("{}-{}.json", id, timestamp.format("%Y%m%d%H%M%S%3f"))
}

/// Extract the embedded timestamp from a snapshot file name.
pub fn parse_snapshot_name(name: &str) -> Option<NaiveDateTime> {
    let stem = name.strip_suffix(".json")?;
    let (_, stamp) = stem.rsplit_once('-')?;
    if stamp.len() != STAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| stamp[range].parse::<u32>().ok();
    let year = stamp[0..4].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?.and_hms_milli_opt(
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
        field(14..17)?,
    )
}

fn truncate_to_millis(ts: NaiveDateTime) -> NaiveDateTime {
    let millis = ts.nanosecond() / 1_000_000;
    ts.with_nanosecond(millis * 1_000_000).unwrap_or(ts)
}

/// Snapshot files on local disk.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// `storage_root` is the directory holding `files/` and `db/`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            root: storage_root.into(),
        }
    }

    pub fn provider_dir(&self, provider: &str) -> PathBuf {
        self.root.join("db").join(provider)
    }

    pub fn snapshot_path(&self, provider: &str, file_name: &str) -> PathBuf {
        self.provider_dir(provider).join(file_name)
    }

    /// Create the provider directory. Returns whether it already existed.
    pub async fn ensure_provider_dir(&self, provider: &str) -> SyncResult<bool> {
        LocalFs::ensure_dir(&self.provider_dir(provider)).await
    }

    /// Write `envelope` as a new snapshot file stamped with the current
    /// local time.
    pub async fn save(&self, envelope: &EncryptedEnvelope, provider: &str) -> SyncResult<String> {
        self.save_at(envelope, provider, Local::now().naive_local())
            .await
    }

    /// Write `envelope` stamped with `timestamp`, bumped past the newest
    /// existing snapshot so embedded timestamps stay strictly increasing.
    pub async fn save_at(
        &self,
        envelope: &EncryptedEnvelope,
        provider: &str,
        timestamp: NaiveDateTime,
    ) -> SyncResult<String> {
        let mut stamp = truncate_to_millis(timestamp);
        if let Some(newest) = self
            .list_local(provider)
            .await?
            .into_iter()
            .filter_map(|e| e.timestamp)
            .max()
        {
            if stamp <= newest {
                stamp = newest + Duration::milliseconds(1);
            }
        }

        let file_name = snapshot_file_name(Uuid::new_v4(), stamp);
        let path = self.snapshot_path(provider, &file_name);
        LocalFs::write_atomic(&path, &envelope.to_json()?).await?;

        tracing::debug!(provider, snapshot = %file_name, "saved snapshot");
        Ok(file_name)
    }

    /// Store a snapshot file received from the remote under its own name.
    pub async fn write_raw(&self, provider: &str, file_name: &str, bytes: &[u8]) -> SyncResult<()> {
        if file_name.contains('/') || file_name.contains("..") {
            return Err(SyncError::CorruptEnvelope(format!(
                "refusing snapshot name {}",
                file_name
            )));
        }
        LocalFs::write_atomic(&self.snapshot_path(provider, file_name), bytes).await
    }

    /// Whether a snapshot file exists locally.
    pub async fn contains(&self, provider: &str, file_name: &str) -> bool {
        tokio::fs::metadata(self.snapshot_path(provider, file_name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read and parse one snapshot file.
    pub async fn read(&self, provider: &str, file_name: &str) -> SyncResult<EncryptedEnvelope> {
        let path = self.snapshot_path(provider, file_name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        EncryptedEnvelope::from_json(&bytes)
    }

    /// Snapshot files for `provider`, oldest first.
    pub async fn list_local(&self, provider: &str) -> SyncResult<Vec<BackupManifestEntry>> {
        let dir = self.provider_dir(provider);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SyncError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_snapshot_name(&name) {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| SyncError::io(entry.path(), e))?;
            if meta.is_file() {
                entries.push(BackupManifestEntry::new(name, meta.len()));
            }
        }

        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Delete the oldest snapshots until at most `keep` remain. Names for
    /// which `protected` returns true are never deleted. Returns the names
    /// removed.
    pub async fn prune<F>(&self, provider: &str, keep: usize, protected: F) -> SyncResult<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let entries = self.list_local(provider).await?;
        if entries.len() <= keep {
            return Ok(Vec::new());
        }

        let mut excess = entries.len() - keep;
        let mut removed = Vec::with_capacity(excess);
        let mut held = 0usize;
        for entry in entries {
            if excess == 0 {
                break;
            }
            if protected(&entry.file_name) {
                held += 1;
                continue;
            }
            let path = self.snapshot_path(provider, &entry.file_name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed.push(entry.file_name),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io(&path, e)),
            }
            excess -= 1;
        }

        if !removed.is_empty() || held > 0 {
            tracing::info!(provider, removed = removed.len(), held, keep, "pruned old snapshots");
        }
        Ok(removed)
    }

    /// Remove the provider directory and everything in it.
    pub async fn clear(&self, provider: &str) -> SyncResult<()> {
        LocalFs::remove_dir(&self.provider_dir(provider)).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
