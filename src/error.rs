//! Error taxonomy for the sync engine.
//!
//! Remote and relational-store collaborators report `anyhow::Error`; the
//! engine folds those into [`SyncError`] with enough context to decide
//! whether a failure is isolated to one item or aborts the whole run.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors produced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Authentication or network failure talking to the provider.
    #[error("connection error: {0}")]
    Connection(String),

    /// Local disk failure, scoped to a single path.
    #[error("I/O error on {}: {source}", path.display())]
    FileIo {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Snapshot envelope could not be decoded, decrypted or decompressed.
    #[error("corrupt snapshot envelope: {0}")]
    CorruptEnvelope(String),

    /// A merge transaction failed and was rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A remote operation failed after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The durable key/value store could not be read or written.
    #[error("state store error: {0}")]
    State(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid settings.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a transport failure, keeping the full context chain.
    pub fn transport(err: anyhow::Error) -> Self {
        Self::Transport(format!("{:#}", err))
    }

    /// Wrap a relational-store failure.
    pub fn transaction(err: anyhow::Error) -> Self {
        Self::Transaction(format!("{:#}", err))
    }
}
