//! Integration tests for snapshots and the backup schedule

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use futures::TryStreamExt;
use tempfile::tempdir;
use tokio::sync::watch;

use memvault::MemoryService;
use memvault::backup::{self, BackupScheduler, SchedulerState, SnapshotWriter};
use memvault::clock::{Clock, system_clock};
use memvault::config::Config;
use memvault::memory::{MemoryRecord, NewMemory};
use memvault::storage::{PutMode, RecordStore, StoreOptions};
use memvault::testing::ManualClock;

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.backup_dir = Some(dir.path().join("backups"));
    config.memory.max_memories = 10;
    config
}

#[tokio::test]
async fn test_snapshot_restores_to_equivalent_store() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::fixed());
    let service = MemoryService::open_with_clock(test_config(&dir), clock.clone())
        .await
        .unwrap();

    service
        .remember_with(NewMemory::new("Sister is called Mia").importance(0.8).tag("family"))
        .await
        .unwrap();
    let forgotten = service.remember("Outdated fact", Some(0.4)).await.unwrap();
    service.remember("Likes hiking", Some(0.6)).await.unwrap();
    service.forget(&forgotten).await.unwrap();
    service.set_secure_info("1. Name is Ada").await.unwrap();

    let info = service.backup_now().await.unwrap();
    assert_eq!(info.metadata.record_count, 2);
    assert_eq!(info.metadata.tombstone_count, 1);
    assert!(info.metadata.secure_info);

    let target = dir.path().join("restored");
    backup::restore(&info.path, &target).await.unwrap();

    let restored = RecordStore::open(&target, StoreOptions::default())
        .await
        .unwrap();
    assert_eq!(*restored.index().snapshot(), *service.store().index().snapshot());
    assert!(restored.is_tombstoned(&forgotten));
    assert!(restored.verify_index().await.unwrap().is_clean());

    let mut ids: Vec<String> = restored.list_ids().await.unwrap().try_collect().await.unwrap();
    ids.sort();
    for id in ids {
        assert_eq!(
            restored.get(&id).await.unwrap(),
            service.get(&id).await.unwrap()
        );
    }

    let mut restored_config = test_config(&dir);
    restored_config.storage.data_dir = target;
    let restored_service = MemoryService::open(restored_config).await.unwrap();
    assert_eq!(
        restored_service.get_secure_info().await.unwrap(),
        service.get_secure_info().await.unwrap()
    );
}

#[tokio::test]
async fn test_snapshot_is_not_affected_by_later_writes() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::fixed());
    let service = MemoryService::open_with_clock(test_config(&dir), clock.clone())
        .await
        .unwrap();

    let id = service.remember("before snapshot", Some(0.5)).await.unwrap();
    let info = service.backup_now().await.unwrap();

    service.rescore(&id, 0.9).await.unwrap();
    service.remember("after snapshot", Some(0.5)).await.unwrap();

    let target = dir.path().join("restored");
    backup::restore(&info.path, &target).await.unwrap();
    let restored = RecordStore::open(&target, StoreOptions::default())
        .await
        .unwrap();

    assert_eq!(restored.len(), 1);
    assert!((restored.get(&id).await.unwrap().importance - 0.5).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_retention_keeps_newest_snapshots() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::fixed());
    let mut config = test_config(&dir);
    config.backup.retain = 3;
    let service = MemoryService::open_with_clock(config, clock.clone())
        .await
        .unwrap();

    let mut names = Vec::new();
    for _ in 0..5 {
        names.push(service.backup_now().await.unwrap().name);
        clock.advance(Duration::minutes(1));
    }

    let kept: Vec<String> = backup::list_snapshots(&dir.path().join("backups"))
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    let expected: Vec<String> = names.into_iter().rev().take(3).collect();
    assert_eq!(kept, expected);
}

#[tokio::test]
async fn test_scheduler_retries_after_failure() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::fixed());
    let store = Arc::new(
        RecordStore::open(dir.path().join("data"), StoreOptions::default().with_clock(clock.clone()))
            .await
            .unwrap(),
    );

    // Block the backup root with a regular file so the first run fails.
    let backup_root = dir.path().join("backups");
    std::fs::write(&backup_root, b"not a directory").unwrap();

    let writer = SnapshotWriter::new(store, backup_root.clone(), 5);
    let scheduler = BackupScheduler::new(writer, StdDuration::from_secs(60), clock.clone());
    let (_tx, rx) = watch::channel(false);

    assert!(scheduler.run_once(&rx).await.is_err());
    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Idle);
    assert!(status.last_failure.is_some());
    assert!(scheduler.is_due(clock.now()));

    std::fs::remove_file(&backup_root).unwrap();
    clock.advance(Duration::seconds(60));

    let info = scheduler.run_once(&rx).await.unwrap();
    assert!(info.is_some());
    assert_eq!(scheduler.status().last_success, Some(clock.now()));
    assert!(!scheduler.is_due(clock.now()));
}

#[tokio::test]
async fn test_scheduler_loop_handles_trigger_and_shutdown() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::fixed());
    let store = Arc::new(
        RecordStore::open(dir.path().join("data"), StoreOptions::default().with_clock(clock.clone()))
            .await
            .unwrap(),
    );
    let backup_root = dir.path().join("backups");
    let writer = SnapshotWriter::new(store, backup_root.clone(), 5);

    // A long interval: the first tick snapshots, later ones are only manual.
    let scheduler = Arc::new(BackupScheduler::new(
        writer,
        StdDuration::from_secs(3600),
        clock.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

    wait_for_snapshots(&backup_root, 1).await;

    clock.advance(Duration::seconds(1));
    scheduler.trigger();
    wait_for_snapshots(&backup_root, 2).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(scheduler.status().state, SchedulerState::Idle);
}

#[tokio::test]
async fn test_scheduler_loop_snapshots_once_per_interval() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        RecordStore::open(dir.path().join("data"), StoreOptions::default())
            .await
            .unwrap(),
    );
    for i in 0..50 {
        store
            .put(
                MemoryRecord::new(format!("fact {i}"), 0.5, chrono::Utc::now()),
                PutMode::Insert,
            )
            .await
            .unwrap();
    }

    let backup_root = dir.path().join("backups");
    let writer = SnapshotWriter::new(store, backup_root.clone(), 100);
    let scheduler = Arc::new(BackupScheduler::new(
        writer,
        StdDuration::from_millis(200),
        system_clock(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

    // One snapshot straight away, then one per interval: about 11 in 2.1s.
    tokio::time::sleep(StdDuration::from_millis(2100)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    let taken = backup::list_snapshots(&backup_root).await.unwrap().len();
    assert!(taken >= 8, "expected about 11 snapshots, got {taken}");
    assert!(taken <= 12, "expected about 11 snapshots, got {taken}");
}

async fn wait_for_snapshots(root: &std::path::Path, count: usize) {
    for _ in 0..200 {
        if backup::list_snapshots(root).await.unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    panic!("expected {count} snapshots under {}", root.display());
}
