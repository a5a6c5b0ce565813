#![allow(dead_code)]

use async_trait::async_trait;
use blobsync::error::StoreError;
use blobsync::store::{BlobMeta, FsObjectStore, ObjectStore};
use blobsync::sync::{BootstrapPolicy, SyncSettings};
use reqwest::StatusCode;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const NOTES_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY NOT NULL,
    body TEXT NOT NULL
);
";

/// A fresh directory under the system temp dir, unique per test.
pub fn unique_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut dir = std::env::temp_dir();
    dir.push(format!("blobsync-{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Short timeouts and delays so failure paths finish quickly.
pub fn fast_settings(database_path: impl Into<PathBuf>) -> SyncSettings {
    let mut settings = SyncSettings::new(database_path);
    settings.bootstrap = BootstrapPolicy {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    };
    settings.verify_timeout = Duration::from_secs(2);
    settings.upload_retry_max_times = 1;
    settings.transfer_timeout = Duration::from_secs(5);
    settings
}

/// Writes a self-contained (rollback journal) database holding `rows` notes.
pub async fn create_notes_db(path: &Path, rows: usize) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .expect("create notes db");
    sqlx::query(NOTES_SCHEMA)
        .execute(&mut conn)
        .await
        .expect("create notes table");
    for i in 0..rows {
        sqlx::query("INSERT INTO notes (body) VALUES (?)")
            .bind(format!("note {i}"))
            .execute(&mut conn)
            .await
            .expect("insert note");
    }
    conn.close().await.expect("close notes db");
}

/// Row count of a database file that is not open elsewhere (or is a stored object copy).
pub async fn count_notes(path: &Path) -> i64 {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .immutable(true)
        .connect()
        .await
        .expect("open db for counting");
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM notes")
        .fetch_one(&mut conn)
        .await
        .expect("count notes");
    conn.close().await.expect("close db");
    count
}

pub fn set_mtime(path: &Path, at: SystemTime) {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open for set_modified");
    file.set_modified(at).expect("set_modified");
}

pub fn hours_ago(hours: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(hours * 3600)
}

/// Keeps only the first page of a multi-page database, like an interrupted download.
pub fn truncate_to_first_page(path: &Path) {
    let bytes = std::fs::read(path).expect("read db");
    let page_size = match u16::from_be_bytes([bytes[16], bytes[17]]) {
        1 => 65_536,
        n => usize::from(n),
    };
    assert!(bytes.len() > page_size, "database must span several pages");
    std::fs::write(path, &bytes[..page_size]).expect("write truncated db");
}

/// Directory bucket whose uploads always fail with a retryable status.
pub struct FlakyStore {
    pub inner: FsObjectStore,
    pub upload_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: FsObjectStore::new(root),
            upload_attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn describe(&self) -> String {
        format!("flaky+{}", self.inner.describe())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        self.inner.download(key, dest).await
    }

    async fn upload(&self, key: &str, _src: &Path, _content_type: &str) -> Result<(), StoreError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Status {
            key: key.to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        })
    }

    async fn metadata(&self, key: &str) -> Result<BlobMeta, StoreError> {
        self.inner.metadata(key).await
    }
}

/// A store that claims the object exists but never finishes a download.
pub struct StallingStore;

#[async_trait]
impl ObjectStore for StallingStore {
    fn describe(&self) -> String {
        "stalling://".to_string()
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn download(&self, _key: &str, _dest: &Path) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn upload(&self, _key: &str, _src: &Path, _content_type: &str) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn metadata(&self, _key: &str) -> Result<BlobMeta, StoreError> {
        Err(StoreError::Timeout(Duration::from_secs(3600)))
    }
}

/// A remote that accepts connections and never answers.
pub struct BlackholeStore;

#[async_trait]
impl ObjectStore for BlackholeStore {
    fn describe(&self) -> String {
        "blackhole://".to_string()
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn download(&self, _key: &str, _dest: &Path) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn upload(&self, _key: &str, _src: &Path, _content_type: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn metadata(&self, _key: &str) -> Result<BlobMeta, StoreError> {
        std::future::pending().await
    }
}
