use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One object or directory in the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full key relative to the provider root, without leading slash.
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl RemoteEntry {
    /// Last path segment of the key.
    pub fn name(&self) -> &str {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.key)
    }

    /// Key relative to `prefix`, or `None` when the entry is outside it.
    pub fn relative_to(&self, prefix: &str) -> Option<&str> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Some(self.key.trim_start_matches('/'));
        }
        self.key
            .trim_start_matches('/')
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    pub fn format_size(&self) -> String {
        if self.is_dir {
            return "<DIR>".to_string();
        }
        format_size(self.size)
    }
}

/// Result of a remote `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

pub fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{} B", size)
    } else if size < 1024 * 1024 {
        format!("{:.1} KB", size as f64 / 1024.0)
    } else if size < 1024 * 1024 * 1024 {
        format!("{:.1} MB", size as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Join remote key segments with single slashes.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
