use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// Local disk helpers shared by the backup store, the trackers and the
/// engine. All operations are async and map failures to `FileIo`.
pub struct LocalFs;

impl LocalFs {
    /// Create `path` and its parents. Returns whether it already existed.
    pub async fn ensure_dir(path: &Path) -> SyncResult<bool> {
        let existed = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !existed {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| SyncError::io(path, e))?;
        }
        Ok(existed)
    }

    /// Write through a sibling temp file so readers never see a torn file.
    pub async fn write_atomic(path: &Path, data: &[u8]) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| SyncError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        Ok(())
    }

    /// Remove a directory tree. A missing directory is not an error.
    pub async fn remove_dir(path: &Path) -> SyncResult<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    /// Size of a local file, `None` when it does not exist.
    pub async fn file_size(path: &Path) -> SyncResult<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    /// Modification time of file metadata as UTC.
    pub fn modified_utc(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
        meta.modified().ok().map(DateTime::<Utc>::from)
    }

    /// Forward-slash relative path of `path` under `root`.
    pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Resolve a remote-relative key under `root`, refusing keys that
    /// would escape it.
    pub fn resolve_key(root: &Path, key: &str) -> Option<PathBuf> {
        let mut resolved = root.to_path_buf();
        let mut depth = 0usize;
        for part in key.split('/') {
            match part {
                "" | "." => {}
                ".." => return None,
                part => {
                    resolved.push(part);
                    depth += 1;
                }
            }
        }
        (depth > 0).then_some(resolved)
    }
}
