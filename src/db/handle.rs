use super::schema::apply_schema;
use crate::error::SyncError;
use crate::sync::files;
use moka::sync::Cache;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteStatement,
    SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Executor, Statement};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub statement_cache_capacity: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            statement_cache_capacity: 256,
        }
    }
}

/// The process's single handle on the local database file.
///
/// Wraps the connection pool together with a cache of prepared statements keyed by query
/// text. The pool is swapped in place when a forced download replaces the file.
pub struct Database {
    path: PathBuf,
    settings: DatabaseSettings,
    schema: Option<Arc<str>>,
    pool: RwLock<SqlitePool>,
    statements: Cache<String, Arc<SqliteStatement<'static>>>,
}

impl Database {
    /// Opens (creating if missing) the file at `path` and applies `schema` if given.
    pub async fn open(
        path: impl Into<PathBuf>,
        settings: DatabaseSettings,
        schema: Option<Arc<str>>,
    ) -> Result<Self, SyncError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e))?;
        }

        let pool = connect(&path, &settings).await?;
        if let Some(script) = schema.as_deref() {
            apply_schema(&pool, script).await?;
        }

        info!(path = %path.display(), "Database opened");
        Ok(Self {
            statements: Cache::new(settings.statement_cache_capacity),
            path,
            settings,
            schema,
            pool: RwLock::new(pool),
        })
    }

    /// A clone of the current pool. Clones share connections.
    pub fn pool(&self) -> SqlitePool {
        match self.pool.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepares `sql` once per process; later calls with the same text hit the cache.
    pub async fn prepare(&self, sql: &str) -> Result<Arc<SqliteStatement<'static>>, SyncError> {
        if let Some(stmt) = self.statements.get(sql) {
            return Ok(stmt);
        }
        let pool = self.pool();
        let stmt = (&pool).prepare(sql).await?;
        let owned = Arc::new(Statement::to_owned(&stmt));
        self.statements.insert(sql.to_string(), owned.clone());
        Ok(owned)
    }

    pub fn cached_statements(&self) -> u64 {
        self.statements.run_pending_tasks();
        self.statements.entry_count()
    }

    /// Folds the write-ahead log into the main file. Returns `false` when a reader or writer
    /// kept part of the log from being folded in; the main file alone is then stale.
    pub async fn checkpoint(&self) -> Result<bool, SyncError> {
        let pool = self.pool();
        let (busy, log_frames, checkpointed): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
                .fetch_one(&pool)
                .await?;
        if busy != 0 {
            debug!(
                path = %self.path.display(),
                log_frames,
                checkpointed,
                "WAL checkpoint incomplete; a reader or writer was busy"
            );
            return Ok(false);
        }
        debug!(path = %self.path.display(), checkpointed, "WAL checkpoint complete");
        Ok(true)
    }

    /// Writes a transactionally consistent, self-contained copy of the database to `dest`.
    ///
    /// The copy is read through the engine, so it includes commits still in the write-ahead
    /// log and is never torn by a concurrent checkpoint. `dest` must not exist.
    pub async fn snapshot_to(&self, dest: &Path) -> Result<(), SyncError> {
        let pool = self.pool();
        sqlx::query("VACUUM INTO ?")
            .bind(dest.to_string_lossy().into_owned())
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// Replaces the database file with a verified `staged` copy and reopens the pool.
    ///
    /// Queries running on the old pool fail with `PoolClosed` while the swap is in progress.
    /// If the rename fails the previous file is reopened and the error returned.
    pub async fn replace_with(&self, staged: &Path) -> Result<(), SyncError> {
        self.pool().close().await;

        if let Err(e) = files::promote(staged, &self.path).await {
            match self.reopen().await {
                Ok(()) => warn!(path = %self.path.display(), "Replacement failed; previous database reopened"),
                Err(reopen) => error!(
                    path = %self.path.display(),
                    error = %reopen,
                    "Replacement failed and the previous database could not be reopened"
                ),
            }
            return Err(e);
        }

        self.reopen().await?;
        self.statements.invalidate_all();
        info!(path = %self.path.display(), "Database file replaced and reopened");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool().close().await;
    }

    async fn reopen(&self) -> Result<(), SyncError> {
        let pool = connect(&self.path, &self.settings).await?;
        if let Some(script) = self.schema.as_deref() {
            apply_schema(&pool, script).await?;
        }
        let mut guard = match self.pool.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = pool;
        Ok(())
    }
}

/// True when the engine reports the database file itself as damaged.
pub(crate) fn is_corruption(err: &SyncError) -> bool {
    const SQLITE_CORRUPT: i32 = 11;
    const SQLITE_NOTADB: i32 = 26;
    match err {
        SyncError::Database(sqlx::Error::Database(db_err)) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB)),
        _ => false,
    }
}

async fn connect(path: &Path, settings: &DatabaseSettings) -> Result<SqlitePool, sqlx::Error> {
    let connect_opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(settings.busy_timeout)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    SqlitePoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .connect_with(connect_opts)
        .await
}

/// Checkpoints a database file that is not (yet) open through a [`Database`].
///
/// Used at startup, where a crash may have left a write-ahead log beside the file.
/// The journal mode is left as found.
pub async fn checkpoint_path(path: &Path) -> Result<(), SyncError> {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .connect()
        .await?;
    let res = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(&mut conn)
        .await;
    conn.close().await?;
    res?;
    Ok(())
}
