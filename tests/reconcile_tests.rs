mod common;

use blobsync::store::{FsObjectStore, Gateway};
use blobsync::sync::{Reconciler, SyncDecision, marker};
use common::{count_notes, create_notes_db, fast_settings, hours_ago, set_mtime, unique_dir};
use std::{path::Path, sync::Arc, time::SystemTime};

fn mtime_secs(path: &Path) -> i64 {
    let modified = std::fs::metadata(path)
        .expect("stat")
        .modified()
        .expect("mtime");
    chrono::DateTime::<chrono::Utc>::from(modified).timestamp()
}

fn reconciler(db_path: &Path, remote: &Path) -> Reconciler {
    Reconciler::new(
        Gateway::new(Arc::new(FsObjectStore::new(remote))),
        fast_settings(db_path),
    )
}

#[tokio::test]
async fn newer_local_is_kept_and_seeds_the_remote() {
    let remote = unique_dir("reconcile-c-remote");
    let local = unique_dir("reconcile-c-local");
    let db_path = local.join("app.db");
    let object = remote.join("app.db");

    create_notes_db(&object, 5).await;
    set_mtime(&object, hours_ago(1));
    create_notes_db(&db_path, 10).await;

    let report = reconciler(&db_path, &remote).run().await.expect("reconcile");
    assert_eq!(report.decision, SyncDecision::Upload);
    assert!(report.transferred);
    assert!(report.bootstrap.is_none());

    assert_eq!(count_notes(&db_path).await, 10);
    assert_eq!(count_notes(&object).await, 10);
    assert_eq!(count_notes(&remote.join("app.db.backup")).await, 10);
    // Local and remote timestamps line up after the transfer.
    assert_eq!(mtime_secs(&db_path), mtime_secs(&object));

    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn newer_remote_replaces_local() {
    let remote = unique_dir("reconcile-newer-remote");
    let local = unique_dir("reconcile-newer-local");
    let db_path = local.join("app.db");
    let object = remote.join("app.db");

    create_notes_db(&db_path, 5).await;
    set_mtime(&db_path, hours_ago(2));
    create_notes_db(&object, 10).await;
    // Leftovers of the old database must not survive the replacement.
    std::fs::write(local.join("app.db-wal"), b"stale").expect("write stale wal");

    let report = reconciler(&db_path, &remote).run().await.expect("reconcile");
    assert_eq!(report.decision, SyncDecision::Download);
    assert!(report.transferred);

    assert_eq!(count_notes(&db_path).await, 10);
    assert!(!local.join("app.db-wal").exists());
    assert_eq!(mtime_secs(&db_path), mtime_secs(&object));
    assert!(marker::load(&db_path).await.is_some());

    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn newer_but_corrupt_remote_keeps_local() {
    let remote = unique_dir("reconcile-corrupt-remote");
    let local = unique_dir("reconcile-corrupt-local");
    let db_path = local.join("app.db");
    let object = remote.join("app.db");

    create_notes_db(&db_path, 5).await;
    set_mtime(&db_path, hours_ago(2));
    create_notes_db(&object, 10).await;
    common::truncate_to_first_page(&object);
    set_mtime(&object, SystemTime::now());

    let report = reconciler(&db_path, &remote).run().await.expect("reconcile");
    assert_eq!(report.decision, SyncDecision::Download);
    assert!(!report.transferred);
    assert_eq!(count_notes(&db_path).await, 5);

    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn equal_timestamps_keep_local() {
    let remote = unique_dir("reconcile-tie-remote");
    let local = unique_dir("reconcile-tie-local");
    let db_path = local.join("app.db");
    let object = remote.join("app.db");

    create_notes_db(&object, 3).await;
    create_notes_db(&db_path, 7).await;
    let same = hours_ago(1);
    set_mtime(&object, same);
    set_mtime(&db_path, same);

    let report = reconciler(&db_path, &remote).run().await.expect("reconcile");
    assert_eq!(report.decision, SyncDecision::Upload);
    assert_eq!(count_notes(&db_path).await, 7);
    assert_eq!(count_notes(&object).await, 7);

    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn second_run_repeats_the_decision_without_transferring() {
    let remote = unique_dir("reconcile-rerun-remote");
    let local = unique_dir("reconcile-rerun-local");
    let db_path = local.join("app.db");
    let object = remote.join("app.db");
    create_notes_db(&db_path, 6).await;

    let first = reconciler(&db_path, &remote).run().await.expect("first run");
    assert_eq!(first.decision, SyncDecision::Upload);
    assert!(first.transferred);
    let object_mtime = std::fs::metadata(&object)
        .expect("stat object")
        .modified()
        .expect("mtime");

    let second = reconciler(&db_path, &remote).run().await.expect("second run");
    assert_eq!(second.decision, first.decision);
    assert!(!second.transferred, "second run only checks metadata");
    assert_eq!(
        std::fs::metadata(&object)
            .expect("stat object")
            .modified()
            .expect("mtime"),
        object_mtime,
        "remote object untouched"
    );

    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn unconfigured_remote_leaves_local_alone() {
    let local = unique_dir("reconcile-local-only");
    let db_path = local.join("app.db");
    create_notes_db(&db_path, 2).await;

    let report = Reconciler::new(Gateway::unconfigured(), fast_settings(&db_path))
        .run()
        .await
        .expect("reconcile");
    assert_eq!(report.decision, SyncDecision::None);
    assert!(!report.transferred);
    assert!(marker::load(&db_path).await.is_none());

    let _ = tokio::fs::remove_dir_all(&local).await;
}
