//! Sync orchestration: one upload or one download run per call.
//!
//! Layout on both sides:
//!
//! ```text
//! <local_root>/files/**            <->  <remote_base>/files/**
//! <local_root>/db/<provider>/*.json <->  <remote_base>/db/<provider>/*.json
//! ```
//!
//! Items inside a run are processed strictly one after another. A failed
//! item is recorded in its tracker and retried on the next run; only a
//! connection failure or a local setup failure aborts a whole run.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::fs::{join_key, LocalFs, RemoteTransport};
use crate::records::{canonical_timestamp, normalize_timestamp, RecordStore};
use crate::state::KeyValueStore;
use crate::sync::backup::{is_snapshot_name, sort_entries, BackupManifestEntry, BackupStore, DEFAULT_RETENTION};
use crate::sync::codec::{CryptoCodec, EncryptedEnvelope};
use crate::sync::conflict::{ConflictLog, ConflictResolution, SyncConflict};
use crate::sync::exclude::ExcludePatterns;
use crate::sync::merge::{MergeEngine, SnapshotFile, DEFAULT_BATCH_SIZE};
use crate::sync::progress::{SyncDirection, SyncKey, SyncKind, SyncRegistry, TrackerHandle};
use crate::sync::snapshot::SnapshotBuilder;
use crate::sync::tracker::{FileChangeTracker, FileSyncInfo, FileSyncStatus};

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Local snapshots kept per provider.
    pub retention: usize,
    pub merge_batch_size: usize,
    /// Record types never put into snapshots nor merged.
    pub excluded_types: Vec<String>,
    /// Parent record types merged before all others.
    pub merge_order: Vec<String>,
    /// Extra glob patterns skipped when scanning `files/`.
    pub exclude_patterns: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            merge_batch_size: DEFAULT_BATCH_SIZE,
            excluded_types: Vec::new(),
            merge_order: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Counters for one phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the phase could not run at all.
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn is_ok(&self) -> bool {
        self.failed == 0 && self.error.is_none()
    }

    fn aborted(err: &SyncError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }

    fn count(&mut self, status: FileSyncStatus) {
        match status {
            FileSyncStatus::Success => self.success += 1,
            FileSyncStatus::Skipped => self.skipped += 1,
            FileSyncStatus::Failed => self.failed += 1,
            FileSyncStatus::Pending | FileSyncStatus::Syncing => {}
        }
    }
}

/// Result of [`SyncOrchestrator::run_upload`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// Snapshot written by this run, if any.
    pub snapshot: Option<String>,
    pub is_full_snapshot: bool,
    pub has_changes: bool,
    pub snapshot_rows: usize,
    pub pruned: Vec<String>,
    pub files: PhaseReport,
    pub database: PhaseReport,
}

impl UploadReport {
    pub fn success(&self) -> bool {
        self.files.is_ok() && self.database.is_ok()
    }
}

/// Result of [`SyncOrchestrator::run_download`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub files: PhaseReport,
    pub database: PhaseReport,
    /// Snapshots merged, oldest first.
    pub merged: Vec<String>,
    pub conflicts: usize,
}

impl DownloadReport {
    pub fn success(&self) -> bool {
        self.files.is_ok() && self.database.is_ok()
    }
}

pub fn last_upload_key(provider: &str) -> String {
    format!("sync.{}.lastUploadTime", provider)
}

pub fn last_download_key(provider: &str) -> String {
    format!("sync.{}.lastDownloadTime", provider)
}

/// Drives upload and download runs against one provider.
pub struct SyncOrchestrator {
    transport: Arc<dyn RemoteTransport>,
    records: Arc<dyn RecordStore>,
    state: Arc<dyn KeyValueStore>,
    registry: Arc<SyncRegistry>,
    codec: CryptoCodec,
    options: SyncOptions,
    excludes: ExcludePatterns,
}

impl SyncOrchestrator {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        records: Arc<dyn RecordStore>,
        state: Arc<dyn KeyValueStore>,
        codec: CryptoCodec,
    ) -> Self {
        Self {
            transport,
            records,
            state,
            registry: Arc::new(SyncRegistry::new()),
            codec,
            options: SyncOptions::default(),
            excludes: ExcludePatterns::with_defaults(),
        }
    }

    /// Apply options. Fails on invalid exclude patterns.
    pub fn with_options(mut self, options: SyncOptions) -> SyncResult<Self> {
        self.excludes = ExcludePatterns::with_extra(&options.exclude_patterns)
            .map_err(|e| SyncError::Config(format!("invalid exclude pattern: {}", e)))?;
        self.options = options;
        Ok(self)
    }

    /// Share a registry with other orchestrators or observers.
    pub fn with_registry(mut self, registry: Arc<SyncRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &'static str {
        self.transport.provider_id()
    }

    /// Whether any run for this provider is in flight. Advisory only.
    pub fn is_running(&self) -> bool {
        self.registry.is_running(self.provider())
    }

    pub async fn test_connection(&self) -> bool {
        self.transport.test_connection().await
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Upload changed files and a new snapshot. `false` on any failure.
    pub async fn upload(&self, local_root: &Path, remote_base: &str) -> bool {
        match self.run_upload(local_root, remote_base).await {
            Ok(report) => report.success(),
            Err(e) => {
                tracing::error!(provider = self.provider(), error = %e, "upload failed");
                false
            }
        }
    }

    pub async fn run_upload(&self, local_root: &Path, remote_base: &str) -> SyncResult<UploadReport> {
        let provider = self.provider();
        let _run = self.registry.begin_run(provider);
        self.ensure_connected().await?;

        let started = Utc::now();
        let backups = BackupStore::new(local_root);
        let files_root = local_root.join("files");
        LocalFs::ensure_dir(&files_root).await?;
        let had_baseline = backups.ensure_provider_dir(provider).await?;
        let last_upload = self.state.get_string(&last_upload_key(provider));

        let mut report = UploadReport::default();

        // A provider directory created just now means no baseline exists yet:
        // record a full snapshot, even an empty one.
        let baseline = if had_baseline { last_upload.clone() } else { None };
        let snapshot = SnapshotBuilder::new(self.records.clone())
            .with_excluded_types(self.options.excluded_types.iter().cloned())
            .build(baseline.as_deref())
            .await?;
        report.is_full_snapshot = snapshot.is_full;
        report.has_changes = snapshot.has_changes;
        report.snapshot_rows = snapshot.row_count();

        if snapshot.has_changes {
            let envelope = self.codec.seal_payload(&snapshot.payload)?;
            let file_name = backups.save(&envelope, provider).await?;
            self.state
                .set(&last_upload_key(provider), canonical_timestamp(started).into())?;
            tracing::info!(
                provider,
                snapshot = %file_name,
                full = snapshot.is_full,
                rows = report.snapshot_rows,
                "wrote snapshot"
            );
            report.snapshot = Some(file_name);
        } else {
            tracing::info!(provider, "no record changes since last upload");
        }

        let since = last_upload.as_deref().and_then(normalize_timestamp);
        report.files = match self
            .upload_files(&files_root, &join_key(&[remote_base, "files"]), since)
            .await
        {
            Ok(phase) => phase,
            Err(e) => {
                tracing::warn!(provider, error = %e, "file upload phase aborted");
                PhaseReport::aborted(&e)
            }
        };

        report.database = match self
            .upload_snapshots(&backups.provider_dir(provider), &self.remote_db_prefix(remote_base))
            .await
        {
            Ok(phase) => phase,
            Err(e) => {
                tracing::warn!(provider, error = %e, "snapshot upload phase aborted");
                PhaseReport::aborted(&e)
            }
        };

        // Only snapshots the remote already holds may go.
        let uploads = self.tracker(SyncDirection::Upload, SyncKind::Database);
        report.pruned = backups
            .prune(provider, self.options.retention, |name| {
                uploads.is_failed(name) || uploads.record(name).is_none()
            })
            .await?;

        tracing::info!(
            provider,
            files_ok = report.files.success,
            files_skipped = report.files.skipped,
            files_failed = report.files.failed,
            snapshots_ok = report.database.success,
            snapshots_failed = report.database.failed,
            "upload finished"
        );
        Ok(report)
    }

    async fn upload_files(
        &self,
        files_root: &Path,
        remote_prefix: &str,
        since: Option<chrono::DateTime<Utc>>,
    ) -> SyncResult<PhaseReport> {
        let mut tracker = self.tracker(SyncDirection::Upload, SyncKind::Files);
        let scanned = tracker.scan(files_root).await?;

        let candidates: Vec<FileSyncInfo> = tracker
            .files_to_sync(&scanned)
            .into_iter()
            .filter(|file| match since {
                Some(ts) => tracker.is_failed(&file.file_path) || file.last_modified > ts,
                None => true,
            })
            .collect();

        Ok(self
            .run_phase(&mut tracker, files_root, remote_prefix, candidates)
            .await)
    }

    async fn upload_snapshots(&self, db_dir: &Path, remote_prefix: &str) -> SyncResult<PhaseReport> {
        let mut tracker = self.tracker(SyncDirection::Upload, SyncKind::Database);
        let scanned: Vec<FileSyncInfo> = tracker
            .scan(db_dir)
            .await?
            .into_iter()
            .filter(|f| !f.file_path.contains('/') && is_snapshot_name(&f.file_path))
            .collect();

        let candidates = tracker.files_to_sync(&scanned);
        Ok(self
            .run_phase(&mut tracker, db_dir, remote_prefix, candidates)
            .await)
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Download changed files and merge unseen snapshots. `false` on any
    /// failure.
    pub async fn sync_to_local(&self, local_root: &Path, remote_base: &str) -> bool {
        match self.run_download(local_root, remote_base).await {
            Ok(report) => report.success(),
            Err(e) => {
                tracing::error!(provider = self.provider(), error = %e, "download failed");
                false
            }
        }
    }

    pub async fn run_download(&self, local_root: &Path, remote_base: &str) -> SyncResult<DownloadReport> {
        let provider = self.provider();
        let _run = self.registry.begin_run(provider);
        self.ensure_connected().await?;

        let started = Utc::now();
        let backups = BackupStore::new(local_root);
        let files_root = local_root.join("files");
        LocalFs::ensure_dir(&files_root).await?;
        backups.ensure_provider_dir(provider).await?;

        let mut report = DownloadReport::default();

        report.files = match self
            .download_files(&files_root, &join_key(&[remote_base, "files"]))
            .await
        {
            Ok(phase) => phase,
            Err(e) => {
                tracing::warn!(provider, error = %e, "file download phase aborted");
                PhaseReport::aborted(&e)
            }
        };

        match self.download_snapshots(&backups, remote_base).await {
            Ok((phase, merged, conflicts)) => {
                report.database = phase;
                report.merged = merged;
                report.conflicts = conflicts;
            }
            Err(e) => {
                tracing::warn!(provider, error = %e, "snapshot download phase aborted");
                report.database = PhaseReport::aborted(&e);
            }
        }

        if report.success() {
            self.state
                .set(&last_download_key(provider), canonical_timestamp(started).into())?;
        }

        tracing::info!(
            provider,
            files_ok = report.files.success,
            files_failed = report.files.failed,
            merged = report.merged.len(),
            conflicts = report.conflicts,
            "download finished"
        );
        Ok(report)
    }

    async fn download_files(&self, files_root: &Path, remote_prefix: &str) -> SyncResult<PhaseReport> {
        let provider = self.provider();
        let mut tracker = self.tracker(SyncDirection::Download, SyncKind::Files);

        let listed = self
            .transport
            .list(remote_prefix)
            .await
            .map_err(SyncError::transport)?;
        let now = Utc::now();
        let remote: Vec<FileSyncInfo> = listed
            .iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| {
                let relative = entry.relative_to(remote_prefix)?;
                if relative.is_empty() || self.excludes.is_excluded(relative) {
                    return None;
                }
                Some(FileSyncInfo::pending(
                    relative,
                    entry.size,
                    entry.last_modified.unwrap_or(now),
                    provider,
                ))
            })
            .collect();

        let candidates = tracker.files_to_sync(&remote);
        Ok(self
            .run_phase(&mut tracker, files_root, remote_prefix, candidates)
            .await)
    }

    async fn download_snapshots(
        &self,
        backups: &BackupStore,
        remote_base: &str,
    ) -> SyncResult<(PhaseReport, Vec<String>, usize)> {
        let provider = self.provider();
        let remote_prefix = self.remote_db_prefix(remote_base);
        let mut tracker = self.tracker(SyncDirection::Download, SyncKind::Database);

        // Seen: present locally, uploaded from here, or merged before.
        let mut seen: BTreeSet<String> = self
            .tracker(SyncDirection::Upload, SyncKind::Database)
            .succeeded_paths();
        seen.extend(tracker.succeeded_paths());

        let listed = self.list_remote_snapshots(remote_base).await?;
        let listed_names: BTreeSet<String> = listed.iter().map(|e| e.file_name.clone()).collect();
        let mut unseen = Vec::new();
        for entry in listed {
            if seen.contains(&entry.file_name) || backups.contains(provider, &entry.file_name).await {
                continue;
            }
            unseen.push(entry);
        }
        // Failed snapshots are retried even after they leave the listing.
        for record in tracker.failed_files() {
            if !listed_names.contains(&record.file_path) && !backups.contains(provider, &record.file_path).await {
                unseen.push(BackupManifestEntry::new(record.file_path, record.size));
            }
        }
        sort_entries(&mut unseen);

        let mut phase = PhaseReport {
            total: unseen.len(),
            ..PhaseReport::default()
        };
        if unseen.is_empty() {
            return Ok((phase, Vec::new(), 0));
        }

        let progress = self.registry.get(provider, SyncDirection::Download, SyncKind::Database);
        progress.lock().start(unseen.len());

        let now = Utc::now();
        let mut fetched: Vec<(FileSyncInfo, Vec<u8>, SnapshotFile)> = Vec::new();
        for entry in &unseen {
            let info = FileSyncInfo::pending(&entry.file_name, entry.size, now, provider);
            progress.lock().set_current_item(&entry.file_name);

            let key = join_key(&[&remote_prefix, &entry.file_name]);
            let result = match self.transport.download(&key).await {
                Ok(bytes) => EncryptedEnvelope::from_json(&bytes).map(|envelope| (bytes, envelope)),
                Err(e) => Err(SyncError::transport(e)),
            };
            match result {
                Ok((bytes, envelope)) => {
                    let snapshot = SnapshotFile::new(&entry.file_name, envelope);
                    fetched.push((info, bytes, snapshot));
                }
                Err(e) => {
                    tracing::warn!(provider, snapshot = %entry.file_name, error = %e, "snapshot download failed");
                    self.record(&mut tracker, &progress, &info, FileSyncStatus::Failed, Some(e.to_string()));
                    phase.count(FileSyncStatus::Failed);
                }
            }
        }

        let merge = MergeEngine::new(self.records.clone(), self.codec.clone())
            .with_batch_size(self.options.merge_batch_size)
            .with_merge_order(self.options.merge_order.iter().cloned())
            .with_excluded_types(self.options.excluded_types.iter().cloned());
        let outcome = merge
            .merge(fetched.iter().map(|(_, _, snapshot)| snapshot.clone()).collect())
            .await;

        for (info, bytes, snapshot) in &fetched {
            let failure = outcome
                .failed_files
                .iter()
                .find(|(name, _)| *name == snapshot.file_name)
                .map(|(_, reason)| reason.clone());

            let (status, error) = match failure {
                None => match backups.write_raw(provider, &snapshot.file_name, bytes).await {
                    Ok(()) => (FileSyncStatus::Success, None),
                    // Merged already; keep it out of the retry set.
                    Err(e) => {
                        tracing::warn!(provider, snapshot = %snapshot.file_name, error = %e, "could not keep merged snapshot");
                        (FileSyncStatus::Success, None)
                    }
                },
                Some(reason) => (FileSyncStatus::Failed, Some(reason)),
            };
            self.record(&mut tracker, &progress, info, status, error);
            phase.count(status);
        }
        progress.lock().finish();

        ConflictLog::new(self.state.clone(), provider).append(&outcome.conflicts)?;
        Ok((phase, outcome.processed_files, outcome.conflicts.len()))
    }

    // ------------------------------------------------------------------
    // Shared per-item loop
    // ------------------------------------------------------------------

    /// Transfer `items` one by one in the tracker's direction, recording
    /// every outcome. Never fails as a whole.
    async fn run_phase(
        &self,
        tracker: &mut FileChangeTracker,
        local_dir: &Path,
        remote_prefix: &str,
        items: Vec<FileSyncInfo>,
    ) -> PhaseReport {
        let key = tracker.key().clone();
        let mut phase = PhaseReport {
            total: items.len(),
            ..PhaseReport::default()
        };
        if items.is_empty() {
            return phase;
        }

        let progress = self.registry.get(&key.provider, key.direction, key.kind);
        progress.lock().start(items.len());

        for item in &items {
            progress.lock().set_current_item(&item.file_path);
            let remote_key = join_key(&[remote_prefix, &item.file_path]);

            let result = match LocalFs::resolve_key(local_dir, &item.file_path) {
                Some(local_path) => match key.direction {
                    SyncDirection::Upload => self.push(&local_path, &remote_key).await,
                    SyncDirection::Download => self.pull(&local_path, &remote_key, item.size).await,
                },
                None => Err(SyncError::io(
                    local_dir.join(&item.file_path),
                    io::Error::new(io::ErrorKind::InvalidInput, "path escapes sync root"),
                )),
            };

            let (status, error) = match result {
                Ok(status) => (status, None),
                Err(e) => {
                    tracing::warn!(tracker = %key, file = %item.file_path, error = %e, "transfer failed");
                    (FileSyncStatus::Failed, Some(e.to_string()))
                }
            };
            self.record(tracker, &progress, item, status, error);
            phase.count(status);
        }

        progress.lock().finish();
        phase
    }

    fn record(
        &self,
        tracker: &mut FileChangeTracker,
        progress: &TrackerHandle,
        item: &FileSyncInfo,
        status: FileSyncStatus,
        error: Option<String>,
    ) {
        progress
            .lock()
            .record_outcome(&item.file_path, status, error.as_deref());
        if let Err(e) = tracker.record_outcome(item, status, error) {
            tracing::error!(tracker = %tracker.key(), file = %item.file_path, error = %e, "could not persist outcome");
        }
    }

    /// Upload unless the remote already holds an object of the same size.
    async fn push(&self, local_path: &Path, remote_key: &str) -> SyncResult<FileSyncStatus> {
        let local_size = match LocalFs::file_size(local_path).await? {
            Some(size) => size,
            None => {
                return Err(SyncError::io(
                    local_path,
                    io::Error::new(io::ErrorKind::NotFound, "file disappeared before upload"),
                ))
            }
        };

        if self.transport.exists(remote_key).await.map_err(SyncError::transport)? {
            let remote = self.transport.stat(remote_key).await.map_err(SyncError::transport)?;
            if remote.size == local_size {
                return Ok(FileSyncStatus::Skipped);
            }
        }

        self.transport
            .upload(local_path, remote_key)
            .await
            .map_err(SyncError::transport)?;
        Ok(FileSyncStatus::Success)
    }

    /// Download unless the local file already has the remote size.
    async fn pull(&self, local_path: &Path, remote_key: &str, remote_size: u64) -> SyncResult<FileSyncStatus> {
        if LocalFs::file_size(local_path).await? == Some(remote_size) {
            return Ok(FileSyncStatus::Skipped);
        }

        let bytes = self
            .transport
            .download(remote_key)
            .await
            .map_err(SyncError::transport)?;
        LocalFs::write_atomic(local_path, &bytes).await?;
        Ok(FileSyncStatus::Success)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Snapshot files stored remotely for this provider, oldest first.
    pub async fn list_remote_snapshots(&self, remote_base: &str) -> SyncResult<Vec<BackupManifestEntry>> {
        let prefix = self.remote_db_prefix(remote_base);
        let listed = self
            .transport
            .list(&prefix)
            .await
            .map_err(SyncError::transport)?;

        let mut entries: Vec<BackupManifestEntry> = listed
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| {
                let relative = e.relative_to(&prefix)?;
                (!relative.contains('/') && is_snapshot_name(relative))
                    .then(|| BackupManifestEntry::new(relative, e.size))
            })
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Delete all snapshots for this provider, locally and remotely, and
    /// reset every tracker and last-sync time so the next run starts over.
    pub async fn clear_remote_backup_data(&self, local_root: &Path, remote_base: &str) -> bool {
        match self.run_clear(local_root, remote_base).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(provider = self.provider(), error = %e, "clearing backup data failed");
                false
            }
        }
    }

    pub async fn run_clear(&self, local_root: &Path, remote_base: &str) -> SyncResult<()> {
        let provider = self.provider();
        let _run = self.registry.begin_run(provider);
        self.ensure_connected().await?;

        BackupStore::new(local_root).clear(provider).await?;
        self.transport
            .delete_all(&self.remote_db_prefix(remote_base))
            .await
            .map_err(SyncError::transport)?;

        self.clear_sync_records()?;
        self.state.delete(&last_upload_key(provider))?;
        self.state.delete(&last_download_key(provider))?;

        tracing::info!(provider, "cleared backup data");
        Ok(())
    }

    /// Reset all per-file records of this provider. Backups stay.
    pub fn clear_sync_records(&self) -> SyncResult<()> {
        for direction in [SyncDirection::Upload, SyncDirection::Download] {
            for kind in [SyncKind::Files, SyncKind::Database] {
                self.tracker(direction, kind).clear()?;
            }
        }
        Ok(())
    }

    /// Items currently queued for retry.
    pub fn failed_files(&self, direction: SyncDirection, kind: SyncKind) -> Vec<FileSyncInfo> {
        self.tracker(direction, kind).failed_files()
    }

    pub fn list_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        ConflictLog::new(self.state.clone(), self.provider()).list()
    }

    /// Settle the logged conflict at `index` and drop it from the log.
    pub async fn resolve_conflict(
        &self,
        index: usize,
        resolution: ConflictResolution,
    ) -> SyncResult<SyncConflict> {
        let log = ConflictLog::new(self.state.clone(), self.provider());
        let pending = log.list()?;
        let Some(conflict) = pending.get(index) else {
            return Err(SyncError::State(format!(
                "no conflict #{} (log has {})",
                index,
                pending.len()
            )));
        };

        if resolution == ConflictResolution::UseRemote {
            MergeEngine::new(self.records.clone(), self.codec.clone())
                .overwrite(&conflict.record_type, vec![conflict.remote.clone()])
                .await?;
        }
        let resolved = log.take(index)?;
        tracing::info!(
            provider = self.provider(),
            record_type = %resolved.record_type,
            resolution = resolution.description(),
            "resolved conflict"
        );
        Ok(resolved)
    }

    fn tracker(&self, direction: SyncDirection, kind: SyncKind) -> FileChangeTracker {
        FileChangeTracker::load(
            self.state.clone(),
            SyncKey::new(self.provider(), direction, kind),
        )
        .with_excludes(self.excludes.clone())
    }

    fn remote_db_prefix(&self, remote_base: &str) -> String {
        join_key(&[remote_base, "db", self.provider()])
    }

    async fn ensure_connected(&self) -> SyncResult<()> {
        if self.transport.test_connection().await {
            Ok(())
        } else {
            Err(SyncError::Connection(format!(
                "{} is unreachable or rejected the credentials",
                self.transport.provider().display_name()
            )))
        }
    }
}

