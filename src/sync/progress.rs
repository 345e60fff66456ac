//! In-memory progress for sync runs.
//!
//! A [`SyncProgressTracker`] covers one (provider, direction, kind) run and
//! pushes its full state to every subscriber after each mutation. The
//! [`SyncRegistry`] hands out one tracker per key and answers whether a
//! provider has a run in flight, from the moment a [`RunGuard`] is taken
//! until it drops.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::sync::tracker::FileSyncStatus;

/// Which way data moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// What is being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// User files under `files/`.
    Files,
    /// Snapshot files under `db/<provider>/`.
    Database,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Database => "database",
        }
    }
}

/// Composite key of one tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncKey {
    pub provider: String,
    pub direction: SyncDirection,
    pub kind: SyncKind,
}

impl SyncKey {
    pub fn new(provider: impl Into<String>, direction: SyncDirection, kind: SyncKind) -> Self {
        Self {
            provider: provider.into(),
            direction,
            kind,
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.provider,
            self.direction.as_str(),
            self.kind.as_str()
        )
    }
}

/// An item that failed during the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub path: String,
    pub error: Option<String>,
}

/// Aggregate state of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub provider: String,
    pub direction: SyncDirection,
    pub kind: SyncKind,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_item: Option<String>,
    pub percentage: u8,
    pub is_running: bool,
    pub is_completed: bool,
    /// Items that ended `success` or `skipped`.
    pub completed: Vec<String>,
    pub failed_items: Vec<FailedItem>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SyncProgress {
    fn idle(key: &SyncKey) -> Self {
        Self {
            provider: key.provider.clone(),
            direction: key.direction,
            kind: key.kind,
            total: 0,
            processed: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            current_item: None,
            percentage: 0,
            is_running: false,
            is_completed: false,
            completed: Vec::new(),
            failed_items: Vec::new(),
            started_at: None,
        }
    }

    fn recompute(&mut self) {
        self.percentage = if self.total == 0 {
            100
        } else {
            let ratio = self.processed as f64 / self.total as f64;
            (ratio * 100.0).round().min(100.0) as u8
        };
        if self.processed >= self.total {
            self.is_completed = true;
            self.is_running = false;
            self.current_item = None;
        }
    }
}

/// Fan-out of progress updates to any number of receivers.
#[derive(Debug, Clone, Default)]
pub struct Observers {
    senders: Arc<Mutex<Vec<UnboundedSender<SyncProgress>>>>,
}

impl Observers {
    pub fn subscribe(&self) -> UnboundedReceiver<SyncProgress> {
        let (tx, rx) = unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }

    fn publish(&self, progress: &SyncProgress) {
        // Receivers that went away are dropped here.
        self.senders
            .lock()
            .retain(|tx| tx.send(progress.clone()).is_ok());
    }
}

/// Counters for one (provider, direction, kind) run.
#[derive(Debug)]
pub struct SyncProgressTracker {
    progress: SyncProgress,
    observers: Observers,
}

impl SyncProgressTracker {
    pub fn new(key: SyncKey) -> Self {
        Self::with_observers(key, Observers::default())
    }

    pub fn with_observers(key: SyncKey, observers: Observers) -> Self {
        Self {
            progress: SyncProgress::idle(&key),
            observers,
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SyncProgress> {
        self.observers.subscribe()
    }

    /// Reset counters and begin a run over `total` items.
    pub fn start(&mut self, total: usize) {
        let key = self.key();
        self.progress = SyncProgress::idle(&key);
        self.progress.total = total;
        self.progress.is_running = total > 0;
        self.progress.started_at = Some(Utc::now());
        self.progress.recompute();
        self.publish();
    }

    pub fn set_current_item(&mut self, path: &str) {
        self.progress.current_item = Some(path.to_string());
        self.publish();
    }

    /// Count one finished item. Non-terminal statuses only move the cursor.
    pub fn record_outcome(&mut self, path: &str, status: FileSyncStatus, error: Option<&str>) {
        match status {
            FileSyncStatus::Success => {
                self.progress.success += 1;
                self.progress.completed.push(path.to_string());
            }
            FileSyncStatus::Skipped => {
                self.progress.skipped += 1;
                self.progress.completed.push(path.to_string());
            }
            FileSyncStatus::Failed => {
                self.progress.failed += 1;
                self.progress.failed_items.push(FailedItem {
                    path: path.to_string(),
                    error: error.map(str::to_string),
                });
            }
            FileSyncStatus::Pending | FileSyncStatus::Syncing => {
                self.set_current_item(path);
                return;
            }
        }
        self.progress.processed += 1;
        self.progress.recompute();
        self.publish();
    }

    /// End a run early. Leaves `is_completed` as it is.
    pub fn finish(&mut self) {
        if self.progress.is_running {
            self.progress.is_running = false;
            self.progress.current_item = None;
            self.publish();
        }
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.clone()
    }

    pub fn is_running(&self) -> bool {
        self.progress.is_running
    }

    pub fn key(&self) -> SyncKey {
        SyncKey::new(
            self.progress.provider.clone(),
            self.progress.direction,
            self.progress.kind,
        )
    }

    fn publish(&self) {
        self.observers.publish(&self.progress);
    }
}

/// Shared handle to one tracker.
pub type TrackerHandle = Arc<Mutex<SyncProgressTracker>>;

/// Marks a provider busy for as long as it is held.
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<Mutex<HashMap<String, usize>>>,
    provider: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = self.runs.lock();
        if let Some(count) = runs.get_mut(&self.provider) {
            *count -= 1;
            if *count == 0 {
                runs.remove(&self.provider);
            }
        }
    }
}

/// One tracker per [`SyncKey`], created on first use.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    trackers: Mutex<HashMap<SyncKey, TrackerHandle>>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
    observers: Observers,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker for this key, created when absent.
    pub fn get(&self, provider: &str, direction: SyncDirection, kind: SyncKind) -> TrackerHandle {
        let key = SyncKey::new(provider, direction, kind);
        self.trackers
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SyncProgressTracker::with_observers(
                    key,
                    self.observers.clone(),
                )))
            })
            .clone()
    }

    /// Mark a whole run for `provider`, phases and setup included.
    pub fn begin_run(&self, provider: &str) -> RunGuard {
        *self.runs.lock().entry(provider.to_string()).or_insert(0) += 1;
        RunGuard {
            runs: self.runs.clone(),
            provider: provider.to_string(),
        }
    }

    /// Whether a run or any tracker for `provider` is in flight. Advisory
    /// only.
    pub fn is_running(&self, provider: &str) -> bool {
        if self.runs.lock().contains_key(provider) {
            return true;
        }
        self.trackers
            .lock()
            .iter()
            .any(|(key, tracker)| key.provider == provider && tracker.lock().is_running())
    }

    /// Progress of every known tracker, ordered by key.
    pub fn snapshot(&self) -> Vec<SyncProgress> {
        let trackers = self.trackers.lock();
        let mut keys: Vec<&SyncKey> = trackers.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| trackers.get(key).map(|t| t.lock().progress()))
            .collect()
    }

    /// Receive every update from every tracker of this registry.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncProgress> {
        self.observers.subscribe()
    }
}
