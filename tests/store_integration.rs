//! Progress store behaviour across reopen, backup and reset.

#![allow(clippy::unwrap_used)]

use sharepoint_backup::store::{NewDiscovery, SiteRollup};
use sharepoint_backup::{Database, FileStatus, ProgressStore, SiteStatus};
use tempfile::TempDir;

fn discovery<'a>(path: &'a str, site: &'a str) -> NewDiscovery<'a> {
    NewDiscovery {
        path,
        site,
        library: "Documents",
        file_name: path.rsplit('/').next().unwrap_or(path),
        size_bytes: Some(1024 * 1024),
    }
}

async fn open(dir: &TempDir) -> ProgressStore {
    ProgressStore::new(Database::new(&dir.path().join("progress.db")).await.unwrap())
}

#[tokio::test]
async fn test_progress_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    store
        .record_discovery(&discovery("out/Eng/Documents/a.txt", "Eng"))
        .await
        .unwrap();
    store.mark_downloading("out/Eng/Documents/a.txt").await.unwrap();
    store
        .mark_completed("out/Eng/Documents/a.txt", Some(1024 * 1024))
        .await
        .unwrap();
    store
        .record_discovery(&discovery("out/Eng/Documents/b.txt", "Eng"))
        .await
        .unwrap();
    store.mark_downloading("out/Eng/Documents/b.txt").await.unwrap();
    store.database().clone().close().await;

    let reopened = open(&dir).await;

    let a = reopened.get("out/Eng/Documents/a.txt").await.unwrap().unwrap();
    assert_eq!(a.status(), FileStatus::Completed);
    let b = reopened.get("out/Eng/Documents/b.txt").await.unwrap().unwrap();
    assert_eq!(b.status(), FileStatus::Downloading);
    assert_eq!(b.attempt_count, 1);

    let counters = reopened.counters().await.unwrap();
    assert_eq!(counters.total_files, 2.0);
    assert_eq!(counters.successful_downloads, 1.0);
    assert!((counters.mb_downloaded - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_rediscovery_keeps_existing_record() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let path = "out/Eng/Documents/a.txt";

    assert!(store.record_discovery(&discovery(path, "Eng")).await.unwrap());
    store.mark_downloading(path).await.unwrap();
    store.mark_failed(path, "timeout").await.unwrap();
    assert!(!store.record_discovery(&discovery(path, "Eng")).await.unwrap());

    let record = store.get(path).await.unwrap().unwrap();
    assert_eq!(record.status(), FileStatus::Failed);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(store.counters().await.unwrap().total_files, 1.0);
}

#[tokio::test]
async fn test_site_rollup_and_status_follow_records() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    for name in ["a", "b", "c"] {
        let path = format!("out/Eng/Documents/{name}.txt");
        store.record_discovery(&discovery(&path, "Eng")).await.unwrap();
    }
    store.begin_site("Eng", "https://contoso.sharepoint.com/sites/eng").await.unwrap();

    assert_eq!(
        store.site_rollup("Eng").await.unwrap(),
        SiteRollup {
            total: 3,
            completed: 0,
            failed: 0,
            discovered: 3,
            downloading: 0,
        }
    );
    assert_eq!(
        store.recompute_site_status("Eng").await.unwrap(),
        SiteStatus::Processing
    );

    for name in ["a", "b"] {
        let path = format!("out/Eng/Documents/{name}.txt");
        store.mark_downloading(&path).await.unwrap();
        store.mark_completed(&path, Some(10)).await.unwrap();
    }
    store.mark_downloading("out/Eng/Documents/c.txt").await.unwrap();
    store.mark_failed("out/Eng/Documents/c.txt", "HTTP 500").await.unwrap();

    assert_eq!(
        store.recompute_site_status("Eng").await.unwrap(),
        SiteStatus::CompletedWithErrors
    );
    let site = store.get_site("Eng").await.unwrap().unwrap();
    assert_eq!(site.site_url, "https://contoso.sharepoint.com/sites/eng");
    assert_eq!((site.total_files, site.completed_files, site.failed_files), (3, 2, 1));
    assert_eq!(store.recompute_site_status("Nowhere").await.unwrap(), SiteStatus::Empty);
}

#[tokio::test]
async fn test_reset_site_only_touches_named_site() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    for (path, site) in [
        ("out/Eng/Documents/done.txt", "Eng"),
        ("out/Eng/Documents/bad.txt", "Eng"),
        ("out/Ops/Documents/bad.txt", "Ops"),
    ] {
        store.record_discovery(&discovery(path, site)).await.unwrap();
        store.mark_downloading(path).await.unwrap();
    }
    store.mark_completed("out/Eng/Documents/done.txt", Some(5)).await.unwrap();
    store.mark_failed("out/Eng/Documents/bad.txt", "x").await.unwrap();
    store.mark_failed("out/Ops/Documents/bad.txt", "x").await.unwrap();
    store.recompute_site_status("Eng").await.unwrap();

    assert_eq!(store.reset_site("Eng").await.unwrap(), 1);

    assert!(store.get_site("Eng").await.unwrap().is_none());
    let done = store.get("out/Eng/Documents/done.txt").await.unwrap().unwrap();
    assert_eq!(done.status(), FileStatus::Completed);
    let eng_bad = store.get("out/Eng/Documents/bad.txt").await.unwrap().unwrap();
    assert_eq!(eng_bad.status(), FileStatus::Discovered);
    assert_eq!(eng_bad.attempt_count, 0);
    assert!(eng_bad.error_message.is_none());
    let ops_bad = store.get("out/Ops/Documents/bad.txt").await.unwrap().unwrap();
    assert_eq!(ops_bad.status(), FileStatus::Failed);
}

#[tokio::test]
async fn test_recompute_counters_repairs_drift() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let path = "out/Eng/Documents/a.txt";
    store.record_discovery(&discovery(path, "Eng")).await.unwrap();
    store.mark_downloading(path).await.unwrap();
    store.mark_completed(path, Some(2 * 1024 * 1024)).await.unwrap();
    store
        .increment_counter(sharepoint_backup::store::Counter::SuccessfulDownloads, 41.0)
        .await
        .unwrap();
    store
        .increment_counter(sharepoint_backup::store::Counter::ApiErrors, 3.0)
        .await
        .unwrap();

    let repaired = store.recompute_counters().await.unwrap();

    assert_eq!(repaired.total_files, 1.0);
    assert_eq!(repaired.successful_downloads, 1.0);
    assert_eq!(repaired.failed_downloads, 0.0);
    assert!((repaired.mb_downloaded - 2.0).abs() < 1e-9);
    assert_eq!(repaired.api_errors, 3.0);
}

#[tokio::test]
async fn test_backup_is_a_readable_copy() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let path = "out/Eng/Documents/a.txt";
    store.record_discovery(&discovery(path, "Eng")).await.unwrap();
    let target = dir.path().join("backup.db");

    store.backup_to(&target).await.unwrap();
    store.mark_downloading(path).await.unwrap();

    let copy = ProgressStore::new(Database::open_read_only(&target).await.unwrap());
    let record = copy.get(path).await.unwrap().unwrap();
    assert_eq!(record.status(), FileStatus::Discovered);
    assert_eq!(record.attempt_count, 0);
}

#[tokio::test]
async fn test_open_read_only_requires_existing_file() {
    let dir = TempDir::new().unwrap();
    let result = Database::open_read_only(&dir.path().join("missing.db")).await;
    assert!(result.is_err());
}
