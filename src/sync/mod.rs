//! Incremental encrypted sync engine.
//!
//! Local records are turned into encrypted snapshots, shipped to a remote
//! provider next to the user's file tree, and merged back on other
//! devices oldest snapshot first.

pub mod backup;
pub mod codec;
pub mod compression;
pub mod conflict;
pub mod engine;
pub mod exclude;
pub mod merge;
pub mod progress;
pub mod snapshot;
pub mod tracker;

pub use backup::{BackupManifestEntry, BackupStore};
pub use codec::{CryptoCodec, EncryptedEnvelope};
pub use conflict::{ConflictLog, ConflictResolution, SyncConflict};
pub use engine::{DownloadReport, PhaseReport, SyncOptions, SyncOrchestrator, UploadReport};
pub use exclude::ExcludePatterns;
pub use merge::{MergeEngine, MergeOutcome, SnapshotFile};
pub use progress::{RunGuard, SyncDirection, SyncKey, SyncKind, SyncProgress, SyncProgressTracker, SyncRegistry};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotPayload};
pub use tracker::{FileChangeTracker, FileSyncInfo, FileSyncStatus};
