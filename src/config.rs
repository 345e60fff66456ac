//! Settings for the `snapvault` binary, read from TOML.
//!
//! ```toml
//! storage_root = "/home/me/.local/share/snapvault"
//! remote_base = "snapvault"
//!
//! [provider]
//! kind = "webdav"
//! endpoint = "https://dav.example.com/remote.php/dav"
//! username = "me"
//!
//! [sync]
//! retention = 20
//! merge_order = ["folder"]
//!
//! [[record_types]]
//! name = "note"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};
use crate::fs::{Provider, S3Provider};
use crate::records::RecordTypeDescriptor;
use crate::sync::backup::DEFAULT_RETENTION;
use crate::sync::codec::{CryptoCodec, DEFAULT_PASSPHRASE};
use crate::sync::engine::SyncOptions;
use crate::sync::merge::DEFAULT_BATCH_SIZE;

const APP_DIR: &str = "snapvault";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding `files/` and `db/`.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Prefix of everything stored remotely.
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
    /// Durable key/value state. Defaults to `<storage_root>/state.json`.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Record store document. Defaults to `<storage_root>/records.json`.
    #[serde(default)]
    pub records_file: Option<PathBuf>,
    /// Overrides the built-in snapshot passphrase.
    #[serde(default)]
    pub passphrase: Option<String>,
    pub provider: Provider,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub record_types: Vec<RecordTypeSettings>,
}

/// `[sync]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub retention: usize,
    pub merge_batch_size: usize,
    pub excluded_types: Vec<String>,
    pub merge_order: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for SyncSettings {
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

/// One `[[record_types]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeSettings {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default = "default_modified_column")]
    pub modified_column: String,
}

fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

fn default_remote_base() -> String {
    APP_DIR.to_string()
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_modified_column() -> String {
    "updateTime".to_string()
}

/// `<config_dir>/snapvault/config.toml`.
pub fn default_config_path() -> SyncResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
        .ok_or_else(|| SyncError::Config("cannot resolve the user config directory".to_string()))
}

impl Settings {
    /// Read and validate settings from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::Config(format!("cannot read settings at {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
            .map_err(|e| SyncError::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_toml(raw: &str) -> SyncResult<Self> {
        let settings: Settings = toml::from_str(raw)
            .map_err(|e| SyncError::Config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.retention == 0 {
            return Err(SyncError::Config("sync.retention must be at least 1".into()));
        }
        if self.sync.merge_batch_size == 0 {
            return Err(SyncError::Config("sync.merge_batch_size must be at least 1".into()));
        }

        let blank = |value: &str| value.trim().is_empty();
        match &self.provider {
            Provider::WebDav { endpoint, .. } if blank(endpoint) => {
                Err(SyncError::Config("provider.endpoint is required for webdav".into()))
            }
            Provider::S3 { bucket, .. } if blank(bucket) => {
                Err(SyncError::Config("provider.bucket is required for s3".into()))
            }
            Provider::S3 { region, .. } if blank(region) => {
                Err(SyncError::Config("provider.region is required for s3".into()))
            }
            Provider::S3 {
                flavor: S3Provider::Custom { endpoint, .. },
                ..
            } if blank(endpoint) => Err(SyncError::Config(
                "provider.flavor.endpoint is required for custom s3".into(),
            )),
            Provider::Local { root } if root.as_os_str().is_empty() => {
                Err(SyncError::Config("provider.root is required for local".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.storage_root.join("state.json"))
    }

    pub fn records_path(&self) -> PathBuf {
        self.records_file
            .clone()
            .unwrap_or_else(|| self.storage_root.join("records.json"))
    }

    pub fn codec(&self) -> CryptoCodec {
        CryptoCodec::from_passphrase(self.passphrase.as_deref().unwrap_or(DEFAULT_PASSPHRASE))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            retention: self.sync.retention,
            merge_batch_size: self.sync.merge_batch_size,
            excluded_types: self.sync.excluded_types.clone(),
            merge_order: self.sync.merge_order.clone(),
            exclude_patterns: self.sync.exclude_patterns.clone(),
        }
    }

    pub fn descriptors(&self) -> Vec<RecordTypeDescriptor> {
        self.record_types
            .iter()
            .map(|t| {
                RecordTypeDescriptor::new(&t.name)
                    .with_primary_key(&t.primary_key)
                    .with_modified_column(&t.modified_column)
            })
            .collect()
    }
}
