mod common;

use blobsync::db::{Database, DatabaseProvider, ProviderState};
use blobsync::store::{FsObjectStore, Gateway};
use blobsync::sync::{SyncDecision, SyncOutcome, SyncTrigger};
use common::{FlakyStore, NOTES_SCHEMA, count_notes, fast_settings, unique_dir};
use sqlx::Statement;
use std::{io::Write, path::Path, sync::Arc, time::Duration};

async fn insert_note(db: &Database, body: &str) {
    sqlx::query("INSERT INTO notes (body) VALUES (?)")
        .bind(body)
        .execute(&db.pool())
        .await
        .expect("insert note");
}

async fn rows(db: &Database) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM notes")
        .fetch_one(&db.pool())
        .await
        .expect("count notes")
}

fn fs_provider(db_path: &Path, remote: &Path) -> DatabaseProvider {
    DatabaseProvider::new(
        fast_settings(db_path),
        Gateway::new(Arc::new(FsObjectStore::new(remote))),
    )
    .with_schema(NOTES_SCHEMA)
}

#[tokio::test]
async fn local_only_mode_skips_every_sync() {
    let local = unique_dir("write-local-only");
    let provider = DatabaseProvider::new(fast_settings(local.join("app.db")), Gateway::unconfigured())
        .with_schema(NOTES_SCHEMA);
    assert!(!provider.is_remote_configured());

    let db = provider.get_handle().await.expect("get_handle");
    assert_eq!(provider.state(), ProviderState::Ready);
    insert_note(&db, "hello").await;

    let outcome = provider.notify_write_committed().await.expect("notify");
    assert_eq!(outcome, SyncOutcome::SkippedNotConfigured);
    assert_eq!(
        provider.force_download().await.expect("force_download"),
        SyncOutcome::SkippedNotConfigured
    );

    let status = provider.status();
    assert!(!status.remote_configured);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(
        status.startup.expect("startup").decision,
        SyncDecision::FreshCreate
    );
    assert_eq!(rows(&db).await, 1);

    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn remote_outage_never_fails_the_write() {
    let remote = unique_dir("write-d-remote");
    let local = unique_dir("write-d-local");
    let store = Arc::new(FlakyStore::new(&remote));
    let provider = DatabaseProvider::new(
        fast_settings(local.join("app.db")),
        Gateway::new(store.clone()),
    )
    .with_schema(NOTES_SCHEMA);

    let db = provider.get_handle().await.expect("get_handle");
    insert_note(&db, "committed").await;

    let outcome = provider.notify_write_committed().await.expect("notify is not an error");
    assert!(
        matches!(outcome, SyncOutcome::Failed { .. }),
        "unexpected outcome {outcome:?}"
    );
    // One attempt plus one retry for the primary key; the backup is not attempted.
    assert_eq!(store.attempts(), 2);
    assert_eq!(rows(&db).await, 1, "the committed write stays local");

    let status = provider.status();
    assert_eq!(status.consecutive_failures, 1);
    let last = status.last_sync.expect("last sync recorded");
    assert_eq!(last.trigger, SyncTrigger::WriteCommitted);
    assert!(!last.outcome.is_success());
    assert!(status.last_success_at.is_none());

    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn last_synced_state_survives_a_new_container() {
    let remote = unique_dir("write-handover-remote");
    let first_local = unique_dir("write-handover-first");
    let second_local = unique_dir("write-handover-second");

    let first = fs_provider(&first_local.join("app.db"), &remote);
    let db = first.get_handle().await.expect("get_handle");
    for body in ["a", "b", "c"] {
        insert_note(&db, body).await;
    }
    assert_eq!(
        first.notify_write_committed().await.expect("notify"),
        SyncOutcome::Uploaded
    );
    assert_eq!(count_notes(&remote.join("app.db")).await, 3);
    assert_eq!(count_notes(&remote.join("app.db.backup")).await, 3);
    let status = first.status();
    assert!(status.last_success_at.is_some());
    assert_eq!(status.consecutive_failures, 0);
    first.close().await;

    // Fresh disk, same remote.
    let second = fs_provider(&second_local.join("app.db"), &remote);
    let db = second.get_handle().await.expect("get_handle");
    assert_eq!(rows(&db).await, 3);
    second.close().await;

    for dir in [&remote, &first_local, &second_local] {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

#[tokio::test]
async fn manual_transfers_move_state_between_instances() {
    let remote = unique_dir("write-manual-remote");
    let a_local = unique_dir("write-manual-a");
    let b_local = unique_dir("write-manual-b");

    let a = fs_provider(&a_local.join("app.db"), &remote);
    let a_db = a.get_handle().await.expect("a get_handle");
    insert_note(&a_db, "one").await;
    insert_note(&a_db, "two").await;
    assert_eq!(a.force_upload().await.expect("force_upload"), SyncOutcome::Uploaded);
    assert_eq!(
        a.status().last_sync.expect("last sync").trigger,
        SyncTrigger::ManualUpload
    );

    let b = fs_provider(&b_local.join("app.db"), &remote);
    let b_db = b.get_handle().await.expect("b get_handle");
    assert_eq!(rows(&b_db).await, 2);

    insert_note(&a_db, "three").await;
    assert_eq!(
        a.notify_write_committed().await.expect("notify"),
        SyncOutcome::Uploaded
    );

    assert_eq!(
        b.force_download().await.expect("force_download"),
        SyncOutcome::Downloaded
    );
    assert_eq!(rows(&b_db).await, 3, "same handle sees the downloaded file");
    assert_eq!(
        b.status().last_sync.expect("last sync").trigger,
        SyncTrigger::ManualDownload
    );

    a.close().await;
    b.close().await;
    for dir in [&remote, &a_local, &b_local] {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

#[tokio::test]
async fn forced_download_without_remote_copy_keeps_local() {
    let remote = unique_dir("write-missing-remote");
    let local = unique_dir("write-missing-local");

    let provider = fs_provider(&local.join("app.db"), &remote);
    let db = provider.get_handle().await.expect("get_handle");
    insert_note(&db, "only here").await;

    assert_eq!(
        provider.force_download().await.expect("force_download"),
        SyncOutcome::RemoteMissing
    );
    assert_eq!(rows(&db).await, 1);

    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn prepared_statements_are_cached_by_text() {
    let local = unique_dir("write-statements");
    let provider = DatabaseProvider::new(fast_settings(local.join("app.db")), Gateway::unconfigured())
        .with_schema(NOTES_SCHEMA);
    let db = provider.get_handle().await.expect("get_handle");
    insert_note(&db, "x").await;

    let sql = "SELECT body FROM notes ORDER BY id";
    let first = db.prepare(sql).await.expect("prepare");
    let second = db.prepare(sql).await.expect("prepare again");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(db.cached_statements(), 1);

    let bodies: Vec<(String,)> = first
        .query_as()
        .fetch_all(&db.pool())
        .await
        .expect("run cached statement");
    assert_eq!(bodies, vec![("x".to_string(),)]);

    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn write_sync_carries_commits_held_back_by_an_open_reader() {
    let remote = unique_dir("write-reader-remote");
    let local = unique_dir("write-reader-local");
    let mut settings = fast_settings(local.join("app.db"));
    settings.database.busy_timeout = Duration::from_millis(200);
    let provider = DatabaseProvider::new(
        settings,
        Gateway::new(Arc::new(FsObjectStore::new(&remote))),
    )
    .with_schema(NOTES_SCHEMA);

    let db = provider.get_handle().await.expect("get_handle");
    insert_note(&db, "a").await;
    assert_eq!(
        provider.notify_write_committed().await.expect("notify"),
        SyncOutcome::Uploaded
    );

    // The open read transaction keeps the checkpoint from folding in later commits.
    let mut reader = db.pool().begin().await.expect("begin reader");
    let seen: i64 = sqlx::query_scalar("SELECT count(*) FROM notes")
        .fetch_one(&mut *reader)
        .await
        .expect("reader select");
    assert_eq!(seen, 1);
    insert_note(&db, "b").await;

    assert_eq!(
        provider.notify_write_committed().await.expect("notify"),
        SyncOutcome::Uploaded
    );
    assert_eq!(count_notes(&remote.join("app.db")).await, 2);
    assert_eq!(count_notes(&remote.join("app.db.backup")).await, 2);

    reader.rollback().await.expect("end reader");
    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}

#[tokio::test]
async fn corrupt_local_file_is_never_uploaded() {
    let remote = unique_dir("write-corrupt-remote");
    let local = unique_dir("write-corrupt-local");
    let db_path = local.join("app.db");

    let provider = fs_provider(&db_path, &remote);
    let db = provider.get_handle().await.expect("get_handle");
    insert_note(&db, "good").await;
    assert_eq!(
        provider.notify_write_committed().await.expect("notify"),
        SyncOutcome::Uploaded
    );
    let object = remote.join("app.db");
    let uploaded = std::fs::read(&object).expect("read remote object");

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&db_path)
        .expect("open live file");
    file.write_all(b"not a database!!").expect("overwrite header");
    drop(file);

    assert_eq!(
        provider
            .notify_write_committed()
            .await
            .expect("a corrupt local file is not an error"),
        SyncOutcome::SkippedCorrupt
    );
    assert_eq!(
        std::fs::read(&object).expect("read remote object"),
        uploaded,
        "remote copy untouched"
    );

    let status = provider.status();
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(
        status.last_sync.expect("last sync").outcome,
        SyncOutcome::SkippedCorrupt
    );

    provider.close().await;
    let _ = tokio::fs::remove_dir_all(&remote).await;
    let _ = tokio::fs::remove_dir_all(&local).await;
}
