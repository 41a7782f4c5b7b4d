mod common;

use chrono::NaiveDate;
use common::{init_tracing, item};
use nook_aggregator::{AggregatorError, ContentQuery, DatePartitionStore, Source};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_write_and_read_partition() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());
    let day = date(2025, 1, 15);

    let mut summarized = item(Source::Reddit, "rust/abc");
    summarized.generated_summary = Some("要約".to_string());
    let items = vec![summarized, item(Source::Reddit, "go/def")];

    let guard = store.lock(Source::Reddit, day).await.unwrap();
    let path = store.write(&guard, items.clone()).await.unwrap();
    drop(guard);

    assert_eq!(path, dir.path().join("reddit").join("2025-01-15.json"));
    assert!(path.exists());

    let read = store.read(Source::Reddit, day).await.unwrap();
    assert_eq!(read, items);

    let document = store.read_document(Source::Reddit, day).await.unwrap().unwrap();
    assert_eq!(document.source, Source::Reddit);
    assert_eq!(document.date, day);
}

#[tokio::test]
async fn test_missing_partition_reads_empty() {
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());

    let items = store.read(Source::Paper, date(2025, 1, 15)).await.unwrap();
    assert!(items.is_empty());
    assert!(store.read_document(Source::Paper, date(2025, 1, 15)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_temp_files_are_invisible_and_swept() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());
    let day = date(2025, 1, 15);

    let guard = store.lock(Source::TechFeed, day).await.unwrap();
    store.write(&guard, vec![item(Source::TechFeed, "x")]).await.unwrap();
    drop(guard);

    // Leftover from a write that died before its rename
    let source_dir = dir.path().join("tech_feed");
    std::fs::write(source_dir.join(".2025-01-16.json.deadbeef.tmp"), b"{\"partial\":").unwrap();

    assert_eq!(store.stored_dates(Source::TechFeed).await.unwrap(), vec![day]);
    assert_eq!(store.read(Source::TechFeed, day).await.unwrap().len(), 1);

    assert_eq!(store.sweep_temp_files().await.unwrap(), 1);
    assert_eq!(store.sweep_temp_files().await.unwrap(), 0);
    assert!(source_dir.join("2025-01-15.json").exists());
}

#[tokio::test]
async fn test_sweep_waits_for_partition_writer() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());
    let day = date(2025, 1, 15);

    let guard = store.lock(Source::TechFeed, day).await.unwrap();
    let in_flight = dir.path().join("tech_feed").join(".2025-01-15.json.inflight.tmp");
    std::fs::write(&in_flight, b"{\"partial\":").unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(100), store.sweep_temp_files()).await;
    assert!(blocked.is_err());
    assert!(in_flight.exists());

    drop(guard);
    assert_eq!(store.sweep_temp_files().await.unwrap(), 1);
    assert!(!in_flight.exists());
}

#[tokio::test]
async fn test_failed_write_keeps_last_committed_partition() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());
    let day = date(2025, 1, 15);

    let guard = store.lock(Source::Reddit, day).await.unwrap();
    store.write(&guard, vec![item(Source::Reddit, "v1")]).await.unwrap();
    drop(guard);
    let committed = store.read(Source::Reddit, day).await.unwrap();

    // Swap the source directory for a plain file while the lock is held
    let source_dir = dir.path().join("reddit");
    let parked = dir.path().join("reddit.parked");
    let guard = store.lock(Source::Reddit, day).await.unwrap();
    std::fs::rename(&source_dir, &parked).unwrap();
    std::fs::write(&source_dir, b"not a directory").unwrap();

    let err = store
        .write(&guard, vec![item(Source::Reddit, "v1"), item(Source::Reddit, "v2")])
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::StoreWriteFailed { .. }));
    drop(guard);

    std::fs::remove_file(&source_dir).unwrap();
    std::fs::rename(&parked, &source_dir).unwrap();

    assert_eq!(store.read(Source::Reddit, day).await.unwrap(), committed);
    let leftovers = std::fs::read_dir(&source_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_released_locks_are_dropped_from_table() {
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());

    for day in 1..=20 {
        let guard = store.lock(Source::Paper, date(2025, 1, day)).await.unwrap();
        drop(guard);
    }
    let held = store.lock(Source::Paper, date(2025, 2, 1)).await.unwrap();
    assert_eq!(store.tracked_locks(), 1);

    let other = store.lock(Source::Hackernews, date(2025, 2, 1)).await.unwrap();
    assert_eq!(store.tracked_locks(), 2);
    drop(held);
    drop(other);
}

#[tokio::test]
async fn test_corrupt_partition_is_read_error() {
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());
    let day = date(2025, 1, 15);

    let path = store.partition_path(Source::Hackernews, day);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"not json").unwrap();

    let err = store.read(Source::Hackernews, day).await.unwrap_err();
    assert!(matches!(err, AggregatorError::StoreReadFailed { .. }));
}

#[tokio::test]
async fn test_concurrent_writers_do_not_lose_items() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DatePartitionStore::new(dir.path()));
    let day = date(2025, 1, 15);

    let mut handles = Vec::new();
    for n in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let guard = store.lock(Source::Hackernews, day).await.unwrap();
            let mut items = store.read(Source::Hackernews, day).await.unwrap();
            tokio::task::yield_now().await;
            items.push(item(Source::Hackernews, &n.to_string()));
            store.write(&guard, items).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let items = store.read(Source::Hackernews, day).await.unwrap();
    assert_eq!(items.len(), 10);
}

#[tokio::test]
async fn test_content_query_views() {
    let dir = TempDir::new().unwrap();
    let store = DatePartitionStore::new(dir.path());

    for day in [date(2025, 1, 14), date(2025, 1, 12), date(2025, 1, 15)] {
        let guard = store.lock(Source::Paper, day).await.unwrap();
        store.write(&guard, vec![item(Source::Paper, "p")]).await.unwrap();
    }
    let guard = store.lock(Source::GithubTrending, date(2025, 1, 15)).await.unwrap();
    store.write(&guard, Vec::new()).await.unwrap();
    drop(guard);

    let sources = store.list_sources().await.unwrap();
    assert_eq!(
        sources.into_iter().collect::<Vec<_>>(),
        vec![Source::GithubTrending, Source::Paper]
    );

    assert_eq!(
        store.list_dates(Source::Paper).await.unwrap(),
        vec![date(2025, 1, 12), date(2025, 1, 14), date(2025, 1, 15)]
    );
    assert_eq!(store.latest_date(Source::Paper).await.unwrap(), Some(date(2025, 1, 15)));
    assert_eq!(store.latest_date(Source::Reddit).await.unwrap(), None);
    assert_eq!(store.get(Source::Paper, date(2025, 1, 14)).await.unwrap().len(), 1);
    assert!(store.get(Source::Paper, date(2025, 1, 1)).await.unwrap().is_empty());
}
