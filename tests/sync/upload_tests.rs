// Upload runs: snapshots, file phase, retries

use chrono::{TimeDelta, Utc};

use super::common::{memory_remote, note, Device, FlakyTransport, REMOTE_BASE};
use snapvault::fs::{join_key, RemoteTransport};
use snapvault::records::canonical_timestamp;
use snapvault::sync::engine::last_upload_key;
use snapvault::sync::{BackupStore, CryptoCodec, EncryptedEnvelope, SyncDirection, SyncKind, SyncOptions};
use snapvault::SyncError;

async fn seed_notes(device: &Device) {
    device
        .records
        .put_rows(
            "note",
            vec![
                note("n1", "groceries", "2024-05-01T09:00:00Z"),
                note("n2", "meeting", "2024-05-01T09:30:00Z"),
                note("n3", "ideas", "2024-05-01T10:00:00Z"),
            ],
        )
        .await
        .unwrap();
}

fn soon() -> String {
    canonical_timestamp(Utc::now() + TimeDelta::seconds(1))
}

#[tokio::test]
async fn first_upload_writes_full_snapshot_and_files() {
    let remote = memory_remote();
    let device = Device::new(remote.clone());
    seed_notes(&device).await;
    device.write_file("a.txt", b"alpha");
    device.write_file("docs/b.txt", b"bravo bravo");

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(report.success());
    assert!(report.is_full_snapshot);
    assert!(report.has_changes);
    assert_eq!(report.snapshot_rows, 3);
    assert_eq!(report.files.success, 2);
    assert_eq!(report.database.success, 1);

    let local = BackupStore::new(device.root()).list_local("memory").await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(Some(&local[0].file_name), report.snapshot.as_ref());

    let remote_snapshots = device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(remote_snapshots.len(), 1);

    // The stored snapshot decrypts with the default key
    let key = join_key(&[REMOTE_BASE, "db", "memory", &remote_snapshots[0].file_name]);
    let bytes = remote.download(&key).await.unwrap();
    let envelope = EncryptedEnvelope::from_json(&bytes).unwrap();
    let payload = CryptoCodec::default().open_payload(&envelope).unwrap();
    assert_eq!(payload["note"].len(), 3);

    let uploaded = remote.download(&join_key(&[REMOTE_BASE, "files", "docs/b.txt"])).await.unwrap();
    assert_eq!(uploaded, b"bravo bravo");
    assert!(device.state_value(&last_upload_key("memory")).is_some());
}

#[tokio::test]
async fn empty_store_still_gets_baseline_snapshot() {
    let device = Device::new(memory_remote());

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(report.is_full_snapshot);
    assert!(report.snapshot.is_some());
    assert_eq!(report.snapshot_rows, 0);
    assert_eq!(report.files.total, 0);
}

#[tokio::test]
async fn rerun_without_changes_writes_nothing() {
    let device = Device::new(memory_remote());
    seed_notes(&device).await;
    device.write_file("a.txt", b"alpha");

    assert!(device.orchestrator.upload(device.root(), REMOTE_BASE).await);
    let stamp = device.state_value(&last_upload_key("memory"));

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(report.success());
    assert!(!report.has_changes);
    assert!(!report.is_full_snapshot);
    assert!(report.snapshot.is_none());
    assert_eq!(report.files.total, 0);
    assert_eq!(report.database.total, 0);
    assert_eq!(device.state_value(&last_upload_key("memory")), stamp);

    let remote_snapshots = device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(remote_snapshots.len(), 1);
    assert!(device.orchestrator.upload(device.root(), REMOTE_BASE).await);
}

#[tokio::test]
async fn second_upload_is_incremental() {
    let device = Device::new(memory_remote());
    seed_notes(&device).await;
    device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    device
        .records
        .put_rows("note", vec![note("n2", "meeting moved", &soon())])
        .await
        .unwrap();

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(!report.is_full_snapshot);
    assert!(report.has_changes);
    assert_eq!(report.snapshot_rows, 1);
    assert_eq!(report.database.success, 1);

    let local = BackupStore::new(device.root()).list_local("memory").await.unwrap();
    assert_eq!(local.len(), 2);
    assert_eq!(Some(&local[1].file_name), report.snapshot.as_ref());
}

#[tokio::test]
async fn excluded_record_types_stay_out_of_snapshots() {
    let remote = memory_remote();
    let options = snapvault::sync::SyncOptions {
        excluded_types: vec!["folder".to_string()],
        ..Default::default()
    };
    let device = Device::with_options(remote.clone(), options);
    seed_notes(&device).await;
    device
        .records
        .put_rows("folder", vec![note("f1", "inbox", "2024-05-01T08:00:00Z")])
        .await
        .unwrap();

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(report.snapshot_rows, 3);

    let name = report.snapshot.unwrap();
    let envelope = BackupStore::new(device.root()).read("memory", &name).await.unwrap();
    let payload = CryptoCodec::default().open_payload(&envelope).unwrap();
    assert!(!payload.contains_key("folder"));
}

#[tokio::test]
async fn identical_remote_files_are_skipped() {
    let remote = memory_remote();
    let first = Device::new(remote.clone());
    first.write_file("a.txt", b"alpha");
    first
        .orchestrator
        .run_upload(first.root(), REMOTE_BASE)
        .await
        .unwrap();

    // Same disk, no sync history
    let fresh = Device::new(remote.clone());
    let orchestrator = snapvault::sync::SyncOrchestrator::new(
        remote,
        fresh.records.clone(),
        fresh.state.clone(),
        CryptoCodec::default(),
    );
    let report = orchestrator.run_upload(first.root(), REMOTE_BASE).await.unwrap();

    assert_eq!(report.files.total, 1);
    assert_eq!(report.files.skipped, 1);
    assert_eq!(report.files.success, 0);
}

#[tokio::test]
async fn failed_file_is_retried_after_restart() {
    let flaky = FlakyTransport::new(memory_remote());
    flaky.reject_uploads("big.bin");
    let device = Device::new(flaky.clone());
    device.write_file("a.txt", b"alpha");
    device.write_file("big.bin", &[7u8; 4096]);

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert!(!report.success());
    assert_eq!(report.files.success, 1);
    assert_eq!(report.files.failed, 1);

    let failed = device
        .orchestrator
        .failed_files(SyncDirection::Upload, SyncKind::Files);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].file_path, "big.bin");
    assert!(failed[0].error.as_deref().unwrap().contains("simulated"));

    // big.bin is older than the last upload but still queued
    flaky.accept_all();
    let restarted = device.restart(flaky.clone());
    let report = restarted.run_upload(device.root(), REMOTE_BASE).await.unwrap();

    assert!(report.success());
    assert_eq!(report.files.total, 1);
    assert_eq!(report.files.success, 1);
    assert!(restarted
        .failed_files(SyncDirection::Upload, SyncKind::Files)
        .is_empty());
}

#[tokio::test]
async fn failed_snapshot_upload_is_retried() {
    let flaky = FlakyTransport::new(memory_remote());
    flaky.reject_uploads("/db/");
    let device = Device::new(flaky.clone());
    seed_notes(&device).await;
    device.write_file("a.txt", b"alpha");

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(report.files.success, 1);
    assert_eq!(report.database.failed, 1);
    assert!(device
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap()
        .is_empty());

    flaky.accept_all();
    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert!(report.snapshot.is_none());
    assert_eq!(report.database.success, 1);
    assert_eq!(
        device
            .orchestrator
            .list_remote_snapshots(REMOTE_BASE)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn unuploaded_snapshots_survive_retention() {
    let flaky = FlakyTransport::new(memory_remote());
    flaky.reject_uploads("/db/");
    let options = SyncOptions {
        retention: 1,
        ..Default::default()
    };
    let laptop = Device::with_options(flaky.clone(), options);
    laptop
        .records
        .put_rows("note", vec![note("n1", "groceries", "2024-05-01T09:00:00Z")])
        .await
        .unwrap();

    let first = laptop
        .orchestrator
        .run_upload(laptop.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(first.database.failed, 1);
    let s1 = first.snapshot.unwrap();

    laptop
        .records
        .put_rows("note", vec![note("n2", "meeting", &soon())])
        .await
        .unwrap();
    let second = laptop
        .orchestrator
        .run_upload(laptop.root(), REMOTE_BASE)
        .await
        .unwrap();
    let s2 = second.snapshot.unwrap();

    // Both are over the limit but neither reached the remote
    assert_eq!(second.database.failed, 2);
    assert!(second.pruned.is_empty());
    let local: Vec<String> = BackupStore::new(laptop.root())
        .list_local("memory")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(local, vec![s1.clone(), s2.clone()]);

    flaky.accept_all();
    let third = laptop
        .orchestrator
        .run_upload(laptop.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(third.database.failed, 0);
    assert!(third.pruned.contains(&s1));
    assert_eq!(
        BackupStore::new(laptop.root()).list_local("memory").await.unwrap().len(),
        1
    );

    let remote_names: Vec<String> = laptop
        .orchestrator
        .list_remote_snapshots(REMOTE_BASE)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert!(remote_names.contains(&s1));
    assert!(remote_names.contains(&s2));

    let phone = Device::new(flaky.clone());
    let report = phone
        .orchestrator
        .run_download(phone.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(phone.records.get("note", "n1").await.unwrap()["body"], "groceries");
    assert_eq!(phone.records.get("note", "n2").await.unwrap()["body"], "meeting");
}

#[tokio::test]
async fn deleted_failed_file_stays_queued() {
    let flaky = FlakyTransport::new(memory_remote());
    flaky.reject_uploads("draft.txt");
    let device = Device::new(flaky.clone());
    device.write_file("draft.txt", b"half written");

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(report.files.failed, 1);

    std::fs::remove_file(device.file("draft.txt")).unwrap();
    flaky.accept_all();
    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert!(!report.success());
    assert_eq!(report.files.total, 1);
    assert_eq!(report.files.failed, 1);
    let failed = device
        .orchestrator
        .failed_files(SyncDirection::Upload, SyncKind::Files);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].file_path, "draft.txt");
    assert!(failed[0].error.as_deref().unwrap().contains("disappeared"));

    // Only clearing the records lets it go
    device.orchestrator.clear_sync_records().unwrap();
    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();
    assert_eq!(report.files.total, 0);
    assert!(device
        .orchestrator
        .failed_files(SyncDirection::Upload, SyncKind::Files)
        .is_empty());
}

#[tokio::test]
async fn run_is_reported_before_any_phase_starts() {
    let flaky = FlakyTransport::new(memory_remote());
    let device = Device::new(flaky.clone());
    flaky.watch(device.orchestrator.registry().clone());
    seed_notes(&device).await;

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

    assert_eq!(flaky.running_at_connect(), vec![true, true]);
    assert!(!device.orchestrator.is_running());
}

#[tokio::test]
async fn unreachable_remote_aborts_upload() {
    let flaky = FlakyTransport::new(memory_remote());
    flaky.set_offline(true);
    let device = Device::new(flaky.clone());
    seed_notes(&device).await;

    assert!(!device.orchestrator.upload(device.root(), REMOTE_BASE).await);
    let err = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));

    // Nothing was written before the connection check
    assert!(BackupStore::new(device.root()).list_local("memory").await.unwrap().is_empty());
    assert!(device.state_value(&last_upload_key("memory")).is_none());
}

#[tokio::test]
async fn exclude_patterns_apply_to_files() {
    let remote = memory_remote();
    let options = snapvault::sync::SyncOptions {
        exclude_patterns: vec!["*.log".to_string()],
        ..Default::default()
    };
    let device = Device::with_options(remote.clone(), options);
    device.write_file("keep.txt", b"keep");
    device.write_file("debug.log", b"noise");
    device.write_file("draft.swp", b"vim");

    let report = device
        .orchestrator
        .run_upload(device.root(), REMOTE_BASE)
        .await
        .unwrap();

    assert_eq!(report.files.total, 1);
    assert!(remote.exists(&join_key(&[REMOTE_BASE, "files", "keep.txt"])).await.unwrap());
    assert!(!remote.exists(&join_key(&[REMOTE_BASE, "files", "debug.log"])).await.unwrap());
}
