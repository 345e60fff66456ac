// Clearing, retention, listing and progress reporting

use chrono::{TimeDelta, Utc};

use super::common::{memory_remote, note, Device, REMOTE_BASE};
use snapvault::records::canonical_timestamp;
use snapvault::state::KeyValueStore;
use snapvault::sync::engine::{last_download_key, last_upload_key};
use snapvault::sync::{BackupStore, SyncDirection, SyncKind, SyncOptions};

async fn touch_note(device: &Device, id: &str) {
    let stamp = canonical_timestamp(Utc::now() + TimeDelta::seconds(1));
    device
        .records
        .put_rows("note", vec![note(id, "changed", &stamp)])
        .await
        .unwrap();
}

#[tokio::test]
async fn clear_resets_snapshots_and_state() {
    let remote = memory_remote();
    let device = Device::new(remote.clone());
    device
        .records
        .put_rows("note", vec![note("n1", "kept", "2024-05-01T09:00:00Z")])
        .await
        .unwrap();
    device.write_file("a.txt", b"alpha");
    device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    device
        .orchestrator
        .run_download(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(
        device
            .orchestrator
            .clear_remote_backup_data(device.root(), REMOTE_BASE)
            .await
    );

    let backups = BackupStore::new(device.root());
    assert!(backups.list_local("memory").await.unwrap().is_empty());
    assert!(device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap()
        .is_empty());
    assert!(device.state_value(&last_upload_key("memory")).is_none());
    assert!(device.state_value(&last_download_key("memory")).is_none());
    assert!(device.state.keys_with_prefix("fileSync.memory.").is_empty());

    // User files and records are not touched
    assert!(device.file("a.txt").exists());
    assert_eq!(device.records.count("note").await, 1);

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert!(report.is_full_snapshot);
    assert_eq!(report.snapshot_rows, 1);
}

#[tokio::test]
async fn clear_sync_records_keeps_backups() {
    let device = Device::new(memory_remote());
    device.write_file("a.txt", b"alpha");
    device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    device.orchestrator.clear_sync_records().unwrap();

    assert!(device.state.keys_with_prefix("fileSync.").is_empty());
    assert!(device.state_value(&last_upload_key("memory")).is_some());
    assert_eq!(
        BackupStore::new(device.root()).list_local("memory").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn local_retention_is_enforced() {
    let remote = memory_remote();
    let options = SyncOptions {
        retention: 2,
        ..Default::default()
    };
    let device = Device::with_options(remote, options);

    let first = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    touch_note(&device, "n1").await;
    device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    touch_note(&device, "n2").await;
    let third = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert_eq!(third.pruned, vec![first.snapshot.unwrap()]);
    let local = BackupStore::new(device.root()).list_local("memory").await.unwrap();
    assert_eq!(local.len(), 2);

    // Remote copies are not pruned
    let remote_snapshots = device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(remote_snapshots.len(), 3);
}

#[tokio::test]
async fn remote_listing_is_oldest_first() {
    let device = Device::new(memory_remote());
    let mut written = Vec::new();
    for id in ["n1", "n2", "n3"] {
        touch_note(&device, id).await;
        let report = device
            .orchestrator
            .run_upload(device.root(), REMOTE_BASE)
            .await
            .unwrap();
        written.push(report.snapshot.unwrap());
    }

    let listed: Vec<String> = device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| {
            assert!(entry.timestamp.is_some());
            entry.file_name
        })
        .collect();
    assert_eq!(listed, written);
}

#[tokio::test]
async fn progress_is_published_per_item() {
    let device = Device::new(memory_remote());
    device.write_file("a.txt", b"alpha");
    device.write_file("b.txt", b"bravo");
    let mut updates = device.orchestrator.registry().subscribe();

    device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    let mut file_updates = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if update.direction == SyncDirection::Upload && update.kind == SyncKind::Files {
            file_updates.push(update);
        }
    }

    let last = file_updates.last().unwrap();
    assert_eq!(last.total, 2);
    assert_eq!(last.success, 2);
    assert_eq!(last.percentage, 100);
    assert!(last.is_completed);
    assert!(!last.is_running);
    assert!(file_updates.iter().any(|u| u.current_item.as_deref() == Some("b.txt")));
    assert!(!device.orchestrator.is_running());

    let snapshot = device.orchestrator.registry().snapshot();
    assert!(snapshot
        .iter()
        .any(|p| p.kind == SyncKind::Database && p.success == 1));
}

#[tokio::test]
async fn connection_check_reports_reachability() {
    let device = Device::new(memory_remote());
    assert!(device.orchestrator.test_connection().await);
    assert_eq!(device.orchestrator.provider(), "memory");
}
