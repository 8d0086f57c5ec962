//! Integration tests for ranked retrieval through MemoryService

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tempfile::tempdir;

use memvault::MemoryService;
use memvault::MemvaultError;
use memvault::config::Config;
use memvault::memory::SECURE_INFO_ID;
use memvault::testing::{ManualClock, write_legacy_file};

fn test_config(dir: &tempfile::TempDir, threshold: f32, max_memories: usize) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.backup_dir = Some(dir.path().join("backups"));
    config.memory.importance_threshold = threshold;
    config.memory.max_memories = max_memories;
    config
}

async fn open(config: Config) -> (MemoryService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::fixed());
    let service = MemoryService::open_with_clock(config, clock.clone())
        .await
        .unwrap();
    (service, clock)
}

#[tokio::test]
async fn test_threshold_scenario_returns_only_important_memory() {
    let dir = tempdir().unwrap();
    let (service, _clock) = open(test_config(&dir, 0.5, 5)).await;

    let a = service.remember("A", Some(0.9)).await.unwrap();
    service.remember("B", Some(0.3)).await.unwrap();

    let results = service.retrieve("what do you know?", 5).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.record.id.clone()).collect();
    assert_eq!(ids, vec![a]);
}

#[tokio::test]
async fn test_retrieve_never_returns_records_below_threshold() {
    let dir = tempdir().unwrap();
    let (service, clock) = open(test_config(&dir, 0.4, 100)).await;

    for i in 0..20 {
        let importance = (i as f32) / 20.0;
        service
            .remember(format!("memory {i}"), Some(importance))
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));
    }

    let results = service.retrieve("ctx", 50).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.secure || r.record.importance >= 0.4));
}

#[tokio::test]
async fn test_secure_info_is_first_and_ignores_threshold() {
    let dir = tempdir().unwrap();
    let (service, _clock) = open(test_config(&dir, 0.95, 10)).await;

    service.remember("high", Some(0.99)).await.unwrap();
    service
        .set_secure_info("Personal:\n1. Name is Ada\n2. Lives in Porto")
        .await
        .unwrap();

    let results = service.retrieve("hello", 5).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].secure);
    assert_eq!(results[0].record.id, SECURE_INFO_ID);
    assert!(!results[1].secure);

    let only_secure = service.retrieve("hello", 1).await.unwrap();
    assert_eq!(only_secure.len(), 1);
    assert!(only_secure[0].secure);
}

#[tokio::test]
async fn test_unset_secure_info_is_not_returned() {
    let dir = tempdir().unwrap();
    let (service, _clock) = open(test_config(&dir, 0.2, 10)).await;

    service.remember("plain", Some(0.5)).await.unwrap();
    let results = service.retrieve("ctx", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].secure);
}

#[tokio::test]
async fn test_empty_store_and_limits() {
    let dir = tempdir().unwrap();
    let (service, _clock) = open(test_config(&dir, 0.2, 10)).await;

    assert!(service.retrieve("ctx", 5).await.unwrap().is_empty());

    service.remember("something", Some(0.9)).await.unwrap();
    assert!(service.retrieve("ctx", 0).await.unwrap().is_empty());
    assert!(matches!(
        service.retrieve("ctx", -1).await,
        Err(MemvaultError::InvalidLimit(-1))
    ));
}

#[tokio::test]
async fn test_recency_breaks_equal_importance() {
    let dir = tempdir().unwrap();
    let (service, clock) = open(test_config(&dir, 0.2, 10)).await;

    let old = service.remember("older", Some(0.6)).await.unwrap();
    clock.advance(Duration::days(7));
    let new = service.remember("newer", Some(0.6)).await.unwrap();

    let results = service.retrieve("ctx", 5).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.record.id.clone()).collect();
    assert_eq!(ids, vec![new, old]);
    assert!((results[1].recency_weight - 0.5).abs() < 1e-4);
    assert!((results[1].score - 0.3).abs() < 1e-4);
}

#[tokio::test]
async fn test_unloadable_bodies_are_skipped_and_backfilled() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 0.2, 10);
    let data_dir = config.storage.data_dir.clone();
    let (service, _clock) = open(config.clone()).await;

    let best = service.remember("best", Some(0.9)).await.unwrap();
    let second = service.remember("second", Some(0.8)).await.unwrap();
    let third = service.remember("third", Some(0.7)).await.unwrap();

    // Corrupt the second-best body behind the store's back.
    write_legacy_file(&data_dir, &second, &json!({"content": "x", "importance": "??"})).unwrap();

    let results = service.retrieve("ctx", 2).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.record.id.clone()).collect();
    assert_eq!(ids, vec![best, third]);
}

#[tokio::test]
async fn test_ties_are_broken_by_identifier() {
    let dir = tempdir().unwrap();
    let (service, _clock) = open(test_config(&dir, 0.2, 10)).await;

    let mut ids = Vec::new();
    for content in ["one", "two", "three"] {
        ids.push(service.remember(content, Some(0.5)).await.unwrap());
    }
    ids.sort();

    let results = service.retrieve("ctx", 3).await.unwrap();
    let got: Vec<_> = results.iter().map(|r| r.record.id.clone()).collect();
    assert_eq!(got, ids);
}
