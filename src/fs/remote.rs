use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::{services, ErrorKind, Metadata, Operator};
use std::path::Path;
use std::sync::Arc;

use crate::fs::backend::{Provider, RemoteTransport};
use crate::fs::types::{RemoteEntry, RemoteStat};
use crate::fs::{s3, webdav};
use crate::records::normalize_timestamp;

/// Remote transport over an OpenDAL operator.
///
/// The provider is matched exactly once, in [`connect`](Self::connect);
/// after that every provider goes through the same code path.
pub struct OperatorTransport {
    operator: Operator,
    provider: Provider,
}

impl OperatorTransport {
    /// Build the operator for `provider`.
    pub fn connect(provider: Provider) -> Result<Self> {
        let operator = match &provider {
            Provider::WebDav {
                endpoint,
                username,
                password,
                root,
            } => webdav::build_operator(
                endpoint,
                username.as_deref(),
                password.as_deref(),
                root.as_deref(),
            )?,
            Provider::S3 {
                bucket,
                region,
                access_key,
                secret_key,
                flavor,
                root,
            } => s3::build_operator(
                bucket,
                region,
                access_key.as_deref(),
                secret_key.as_deref(),
                flavor,
                root.as_deref(),
            )?,
            Provider::Local { root } => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("Failed to create directory: {}", root.display()))?;
                let builder = services::Fs::default().root(&root.to_string_lossy());
                Operator::new(builder)?.finish()
            }
            Provider::Memory => Operator::new(services::Memory::default())?.finish(),
        };

        Ok(Self { operator, provider })
    }

    /// Shared handle, as the engine consumes it.
    pub fn shared(provider: Provider) -> Result<Arc<dyn RemoteTransport>> {
        Ok(Arc::new(Self::connect(provider)?))
    }

    fn dir_path(prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        }
    }

    async fn full_metadata(&self, path: &str, listed: &Metadata) -> Result<Metadata> {
        // Some services omit sizes in listings.
        if listed.mode().is_file() && listed.content_length() == 0 {
            return self
                .operator
                .stat(path)
                .await
                .with_context(|| format!("Failed to stat {}", path));
        }
        Ok(listed.clone())
    }
}

fn last_modified(meta: &Metadata) -> Option<DateTime<Utc>> {
    meta.last_modified()
        .and_then(|ts| normalize_timestamp(&ts.to_string()))
}

#[async_trait]
impl RemoteTransport for OperatorTransport {
    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn test_connection(&self) -> bool {
        match self.operator.check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(provider = self.provider.id(), error = %e, "connection check failed");
                false
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.trim_start_matches('/');
        match self.operator.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to check {}", key)),
        }
    }

    async fn stat(&self, key: &str) -> Result<RemoteStat> {
        let key = key.trim_start_matches('/');
        let meta = self
            .operator
            .stat(key)
            .await
            .with_context(|| format!("Failed to stat {}", key))?;

        Ok(RemoteStat {
            size: meta.content_length(),
            is_dir: meta.mode().is_dir(),
            last_modified: last_modified(&meta),
        })
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let content = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read local file: {}", local_path.display()))?;
        self.upload_bytes(key, content).await
    }

    async fn upload_bytes(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let key = key.trim_start_matches('/');
        self.operator
            .write(key, data)
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let key = key.trim_start_matches('/');
        let content = self
            .operator
            .read(key)
            .await
            .with_context(|| format!("Failed to download {}", key))?;
        Ok(content.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.trim_start_matches('/');
        self.operator
            .delete(key)
            .await
            .with_context(|| format!("Failed to delete {}", key))?;
        Ok(())
    }

    async fn delete_all(&self, prefix: &str) -> Result<()> {
        let dir = Self::dir_path(prefix);
        match self.operator.remove_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", dir)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>> {
        let dir = Self::dir_path(prefix);
        let entries = match self.operator.list_with(&dir).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir)),
        };

        let mut result = Vec::new();
        for entry in entries {
            let path = entry.path();

            // Skip the directory marker of the prefix itself
            if path.is_empty() || path == "/" || path == dir {
                continue;
            }

            let meta = self.full_metadata(path, entry.metadata()).await?;
            result.push(RemoteEntry {
                key: path.trim_end_matches('/').to_string(),
                size: meta.content_length(),
                last_modified: last_modified(&meta),
                is_dir: meta.mode().is_dir(),
            });
        }

        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }
}
