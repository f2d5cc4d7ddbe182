//! Directory watching against a real file system.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use ragversion::models::{ChangeKind, Version};
use ragversion::{Config, Tracker, WatchOptions};

const WAIT: Duration = Duration::from_secs(10);

/// Latest version of `path` once it satisfies `done`, or `None` after [`WAIT`].
async fn wait_for(
    tracker: &Tracker,
    path: &Path,
    done: impl Fn(&Version) -> bool,
) -> Option<Version> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(doc) = tracker.get_document_by_path(path).await.unwrap() {
            if let Some(latest) = tracker.get_latest_version(&doc.id).await.unwrap() {
                if done(&latest) {
                    return Some(latest);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

fn root(tmp: &TempDir) -> PathBuf {
    tmp.path().canonicalize().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watched_file_lifecycle_is_tracked() {
    let tmp = TempDir::new().unwrap();
    let dir = root(&tmp);
    let tracker = Tracker::open(Config::in_memory()).await.unwrap();
    let watcher = tracker
        .watch(
            &dir,
            WatchOptions {
                patterns: vec!["*.md".into()],
                debounce: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(watcher.root(), dir.as_path());

    let guide = dir.join("guide.md");
    let notes = dir.join("notes.txt");
    fs::write(&guide, "# Guide\n\nfirst").unwrap();
    fs::write(&notes, "ignored").unwrap();

    let created = wait_for(&tracker, &guide, |v| v.version_number == 1)
        .await
        .expect("creation was not tracked");
    assert_eq!(created.change_kind, ChangeKind::Created);

    fs::write(&guide, "# Guide\n\nsecond").unwrap();
    let modified = wait_for(&tracker, &guide, |v| v.version_number == 2)
        .await
        .expect("modification was not tracked");
    assert_eq!(modified.change_kind, ChangeKind::Modified);

    fs::remove_file(&guide).unwrap();
    let deleted = wait_for(&tracker, &guide, |v| v.change_kind == ChangeKind::Deleted)
        .await
        .expect("deletion was not tracked");
    assert_eq!(deleted.version_number, 3);

    assert!(tracker.get_document_by_path(&notes).await.unwrap().is_none());
    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_writes_records_one_version() {
    let tmp = TempDir::new().unwrap();
    let dir = root(&tmp);
    let tracker = Tracker::open(Config::in_memory()).await.unwrap();
    let watcher = tracker
        .watch(
            &dir,
            WatchOptions {
                debounce: Duration::from_millis(300),
                ..Default::default()
            },
        )
        .unwrap();

    let path = dir.join("draft.txt");
    for i in 0..5 {
        fs::write(&path, format!("revision {i}")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let version = wait_for(&tracker, &path, |_| true)
        .await
        .expect("burst was not tracked");
    // Give a second flush the chance to happen if debouncing were broken.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let doc = tracker.get_document_by_path(&path).await.unwrap().unwrap();
    assert_eq!(version.version_number, 1);
    assert_eq!(doc.version_count, 1);
    let content = tracker.get_content(&version.id).await.unwrap();
    assert_eq!(content.as_deref(), Some("revision 4"));

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopped_watcher_tracks_nothing_new() {
    let tmp = TempDir::new().unwrap();
    let dir = root(&tmp);
    let tracker = Tracker::open(Config::in_memory()).await.unwrap();
    let watcher = tracker.watch(&dir, WatchOptions::default()).unwrap();
    watcher.stop().await;

    let path = dir.join("late.txt");
    fs::write(&path, "after stop").unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(tracker.get_document_by_path(&path).await.unwrap().is_none());
}
