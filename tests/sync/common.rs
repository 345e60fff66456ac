// Shared fixtures for sync tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use snapvault::fs::{OperatorTransport, Provider, RemoteEntry, RemoteStat, RemoteTransport};
use snapvault::records::memory::row;
use snapvault::records::{MemoryRecordStore, RecordTypeDescriptor, Row};
use snapvault::state::{KeyValueStore, MemoryStateStore};
use snapvault::sync::{CryptoCodec, SyncOptions, SyncOrchestrator, SyncRegistry};

pub const REMOTE_BASE: &str = "vault";

/// Remote wrapper that can go offline or reject uploads for chosen keys.
/// It can also note whether a registry reported a run at each connection
/// check.
pub struct FlakyTransport {
    inner: Arc<dyn RemoteTransport>,
    offline: AtomicBool,
    rejected: Mutex<Vec<String>>,
    watched: Mutex<Option<Arc<SyncRegistry>>>,
    running_at_connect: Mutex<Vec<bool>>,
}

impl FlakyTransport {
    pub fn new(inner: Arc<dyn RemoteTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            offline: AtomicBool::new(false),
            rejected: Mutex::new(Vec::new()),
            watched: Mutex::new(None),
            running_at_connect: Mutex::new(Vec::new()),
        })
    }

    pub fn watch(&self, registry: Arc<SyncRegistry>) {
        *self.watched.lock() = Some(registry);
    }

    pub fn running_at_connect(&self) -> Vec<bool> {
        self.running_at_connect.lock().clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject uploads whose key contains `fragment`.
    pub fn reject_uploads(&self, fragment: &str) {
        self.rejected.lock().push(fragment.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().clear();
    }

    fn check_upload(&self, key: &str) -> Result<()> {
        if self.rejected.lock().iter().any(|f| key.contains(f.as_str())) {
            bail!("simulated upload failure for {}", key);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for FlakyTransport {
    fn provider(&self) -> &Provider {
        self.inner.provider()
    }

    async fn test_connection(&self) -> bool {
        if let Some(registry) = self.watched.lock().as_ref() {
            let running = registry.is_running(self.inner.provider_id());
            self.running_at_connect.lock().push(running);
        }
        !self.offline.load(Ordering::SeqCst) && self.inner.test_connection().await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn stat(&self, key: &str) -> Result<RemoteStat> {
        self.inner.stat(key).await
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        self.check_upload(key)?;
        self.inner.upload(local_path, key).await
    }

    async fn upload_bytes(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.check_upload(key)?;
        self.inner.upload_bytes(key, data).await
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_all(&self, prefix: &str) -> Result<()> {
        self.inner.delete_all(prefix).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>> {
        self.inner.list(prefix).await
    }
}

/// A fresh in-memory remote.
pub fn memory_remote() -> Arc<dyn RemoteTransport> {
    OperatorTransport::shared(Provider::Memory).unwrap()
}

pub fn descriptors() -> Vec<RecordTypeDescriptor> {
    vec![
        RecordTypeDescriptor::new("folder"),
        RecordTypeDescriptor::new("note"),
    ]
}

/// One device: its own disk, record store and durable state.
pub struct Device {
    pub dir: TempDir,
    pub records: Arc<MemoryRecordStore>,
    pub state: Arc<MemoryStateStore>,
    pub orchestrator: SyncOrchestrator,
}

impl Device {
    pub fn new(remote: Arc<dyn RemoteTransport>) -> Self {
        Self::with_options(remote, SyncOptions::default())
    }

    pub fn with_options(remote: Arc<dyn RemoteTransport>, options: SyncOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(MemoryRecordStore::new(descriptors()));
        let state = Arc::new(MemoryStateStore::new());
        let orchestrator = SyncOrchestrator::new(
            remote,
            records.clone(),
            state.clone(),
            CryptoCodec::default(),
        )
        .with_options(options)
        .unwrap();
        Self {
            dir,
            records,
            state,
            orchestrator,
        }
    }

    /// A second orchestrator over the same disk, records and state, as
    /// after a process restart.
    pub fn restart(&self, remote: Arc<dyn RemoteTransport>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            remote,
            self.records.clone(),
            self.state.clone(),
            CryptoCodec::default(),
        )
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.root().join("files").join(relative)
    }

    pub fn write_file(&self, relative: &str, content: &[u8]) {
        let path = self.file(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn state_value(&self, key: &str) -> Option<serde_json::Value> {
        self.state.get(key)
    }
}

pub fn note(id: &str, body: &str, update_time: &str) -> Row {
    row(json!({"id": id, "body": body, "updateTime": update_time}))
}
