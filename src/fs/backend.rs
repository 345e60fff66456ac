use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fs::types::{RemoteEntry, RemoteStat};

/// Remote storage provider, resolved once when the transport is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provider {
    WebDav {
        endpoint: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        root: Option<String>,
    },
    S3 {
        bucket: String,
        region: String,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
        #[serde(default)]
        flavor: S3Provider,
        #[serde(default)]
        root: Option<String>,
    },
    /// A local directory standing in for a remote (NAS mounts, tests).
    Local { root: PathBuf },
    /// Process-local memory, for tests.
    Memory,
}

impl Provider {
    /// Stable identifier used in local directory names and state keys.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::WebDav { .. } => "webdav",
            Provider::S3 { .. } => "s3",
            Provider::Local { .. } => "local",
            Provider::Memory => "memory",
        }
    }

    /// Get a display name for the provider
    pub fn display_name(&self) -> String {
        match self {
            Provider::WebDav { endpoint, .. } => format!("WebDAV ({})", endpoint),
            Provider::S3 { bucket, flavor, .. } => format!("{} ({})", flavor.display_name(), bucket),
            Provider::Local { root } => format!("Local ({})", root.display()),
            Provider::Memory => "Memory".to_string(),
        }
    }
}

/// S3-compatible storage providers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum S3Provider {
    #[default]
    Aws,
    DigitalOcean,
    Hetzner,
    MinIO,
    CloudflareR2,
    Wasabi,
    Custom { name: String, endpoint: String },
}

impl S3Provider {
    /// Get the endpoint URL for this provider
    pub fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None, // Use default AWS endpoint
            S3Provider::DigitalOcean => Some(format!("https://{}.digitaloceanspaces.com", region)),
            S3Provider::Hetzner => Some(format!("https://{}.your-objectstorage.com", region)),
            S3Provider::MinIO => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => Some(format!("https://{}.r2.cloudflarestorage.com", region)),
            S3Provider::Wasabi => Some(format!("https://s3.{}.wasabisys.com", region)),
            S3Provider::Custom { endpoint, .. } => Some(endpoint.clone()),
        }
    }

    /// Get display name for the provider
    pub fn display_name(&self) -> &str {
        match self {
            S3Provider::Aws => "AWS S3",
            S3Provider::DigitalOcean => "DigitalOcean Spaces",
            S3Provider::Hetzner => "Hetzner Object Storage",
            S3Provider::MinIO => "MinIO",
            S3Provider::CloudflareR2 => "Cloudflare R2",
            S3Provider::Wasabi => "Wasabi",
            S3Provider::Custom { name, .. } => name,
        }
    }
}

/// List/upload/download/delete/stat over one provider's namespace.
///
/// Keys are slash-separated and relative to the provider root. Every
/// provider implements this identically; callers never branch on the
/// provider kind.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// The provider this transport was built for.
    fn provider(&self) -> &Provider;

    /// Whether the remote is reachable and the credentials are accepted.
    async fn test_connection(&self) -> bool;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn stat(&self, key: &str) -> Result<RemoteStat>;

    /// Upload a local file to `key`, creating intermediate directories.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Write bytes to `key`.
    async fn upload_bytes(&self, key: &str, data: Vec<u8>) -> Result<()>;

    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete one object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete everything under `prefix`.
    async fn delete_all(&self, prefix: &str) -> Result<()>;

    /// Recursively list `prefix`. A missing prefix lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>>;

    /// Stable provider identifier.
    fn provider_id(&self) -> &'static str {
        self.provider().id()
    }
}
