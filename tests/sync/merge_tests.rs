// Merge ordering and conflict rules

use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use super::common::{descriptors, note};
use snapvault::records::{MemoryRecordStore, Row};
use snapvault::sync::backup::snapshot_file_name;
use snapvault::sync::{CryptoCodec, MergeEngine, SnapshotFile, SnapshotPayload};

fn snapshot(hour: u32, minute: u32, rows: Vec<Row>) -> SnapshotFile {
    let taken = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap();
    let mut payload = SnapshotPayload::new();
    payload.insert("note".to_string(), rows);
    let envelope = CryptoCodec::default().seal_payload(&payload).unwrap();
    SnapshotFile::new(snapshot_file_name(Uuid::new_v4(), taken), envelope)
}

fn engine(store: &Arc<MemoryRecordStore>) -> MergeEngine {
    MergeEngine::new(store.clone(), CryptoCodec::default())
}

fn version_1000() -> SnapshotFile {
    snapshot(10, 0, vec![note("abc", "first draft", "2024-05-01T10:00:00Z")])
}

fn version_1005() -> SnapshotFile {
    snapshot(10, 5, vec![note("abc", "second draft", "2024-05-01T10:05:00Z")])
}

#[tokio::test]
async fn ascending_merge_keeps_latest_without_conflicts() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));

    let outcome = engine(&store).merge(vec![version_1000(), version_1005()]).await;

    assert!(outcome.success);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(outcome.processed_files.len(), 2);
    assert_eq!(store.get("note", "abc").await.unwrap()["body"], "second draft");
}

#[tokio::test]
async fn unsorted_input_is_applied_oldest_first() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let older = version_1000();
    let newer = version_1005();
    let expected = vec![older.file_name.clone(), newer.file_name.clone()];

    let outcome = engine(&store).merge(vec![newer, older]).await;

    assert_eq!(outcome.processed_files, expected);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(store.get("note", "abc").await.unwrap()["body"], "second draft");
}

#[tokio::test]
async fn descending_application_logs_one_conflict() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let merge = engine(&store);

    merge.merge(vec![version_1005()]).await;
    let outcome = merge.merge(vec![version_1000()]).await;

    assert!(outcome.success);
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.local["body"], "second draft");
    assert_eq!(conflict.remote["body"], "first draft");
    assert_eq!(store.get("note", "abc").await.unwrap()["body"], "second draft");
}

#[tokio::test]
async fn older_incoming_row_leaves_local_bytes_untouched() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let local = note("n1", "local edit", "2024-05-01T12:00:00Z");
    store.put_rows("note", vec![local.clone()]).await.unwrap();
    let before = serde_json::to_vec(&store.get("note", "n1").await.unwrap()).unwrap();

    let outcome = engine(&store)
        .merge(vec![snapshot(
            13,
            0,
            vec![note("n1", "stale remote", "2024-05-01T11:00:00Z")],
        )])
        .await;

    assert_eq!(outcome.conflicts.len(), 1);
    let after = serde_json::to_vec(&store.get("note", "n1").await.unwrap()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn stored_time_never_decreases() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let merge = engine(&store);
    let row_times = [
        "2024-05-01T10:00:00Z",
        "2024-05-01T10:03:00Z",
        "2024-05-01T10:01:00Z",
        "2024-05-01T10:07:00Z",
        "2024-05-01T10:02:00Z",
    ];

    let mut latest = String::new();
    for (minute, time) in row_times.iter().enumerate() {
        let file = snapshot(11, minute as u32, vec![note("m", time, time)]);
        merge.merge(vec![file]).await;

        let stored = store.get("note", "m").await.unwrap()["updateTime"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(stored >= latest, "{} went back from {}", stored, latest);
        latest = stored;
    }
    assert_eq!(latest, "2024-05-01T10:07:00Z");
}

#[tokio::test]
async fn undecryptable_snapshot_does_not_block_others() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let mut payload = SnapshotPayload::new();
    payload.insert("note".to_string(), vec![note("x", "secret", "2024-05-01T09:00:00Z")]);
    let foreign = SnapshotFile::new(
        "foreign-20240501090000000.json",
        CryptoCodec::from_passphrase("another device").seal_payload(&payload).unwrap(),
    );

    let outcome = engine(&store).merge(vec![foreign, version_1000()]).await;

    assert!(!outcome.success);
    assert_eq!(outcome.processed_files.len(), 1);
    assert_eq!(outcome.failed_files.len(), 1);
    assert_eq!(outcome.failed_files[0].0, "foreign-20240501090000000.json");
    assert!(store.get("note", "x").await.is_none());
    assert!(store.get("note", "abc").await.is_some());
}

#[tokio::test]
async fn failed_transaction_rolls_back_whole_snapshot() {
    let store = Arc::new(MemoryRecordStore::new(descriptors()));
    let mut payload = SnapshotPayload::new();
    payload.insert("folder".to_string(), vec![note("f1", "inbox", "2024-05-01T09:00:00Z")]);
    payload.insert("note".to_string(), vec![note("n1", "body", "2024-05-01T09:00:00Z")]);
    let mixed = SnapshotFile::new(
        "mixed-20240501090000000.json",
        CryptoCodec::default().seal_payload(&payload).unwrap(),
    );
    store.fail_writes_for("note");

    let outcome = engine(&store).merge(vec![mixed]).await;

    assert!(!outcome.success);
    assert!(outcome.processed_files.is_empty());
    assert_eq!(store.count("folder").await, 0);
    assert_eq!(store.count("note").await, 0);
}
