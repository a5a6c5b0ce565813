use crate::error::SyncError;
use chrono::{DateTime, Utc};
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, warn};

/// `<target>.<purpose>-<uuid>.tmp`, next to the target so promotion is a same-directory rename.
pub(crate) fn staging_path(target: &Path, purpose: &str) -> PathBuf {
    with_suffix(
        target,
        &format!(".{purpose}-{}.tmp", uuid::Uuid::new_v4().simple()),
    )
}

/// `<target><suffix>`, e.g. the `-wal` and `-shm` files SQLite keeps beside the database.
pub(crate) fn with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Modification time of the local file, or `None` if it does not exist.
pub(crate) async fn local_modified(path: &Path) -> Result<Option<DateTime<Utc>>, SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta.modified().map_err(|e| SyncError::local_io(path, e))?;
            Ok(Some(DateTime::<Utc>::from(modified)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::local_io(path, e)),
    }
}

/// Replaces `target` with an already verified `staged` file.
///
/// The `-wal`/`-shm` files of the previous database are removed first: a stale write-ahead
/// log replayed onto a different database file corrupts it.
pub(crate) async fn promote(staged: &Path, target: &Path) -> Result<(), SyncError> {
    for suffix in ["-wal", "-shm"] {
        let sidecar = with_suffix(target, suffix);
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => debug!(path = %sidecar.display(), "Removed stale database sidecar"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::local_io(sidecar, e)),
        }
    }
    tokio::fs::rename(staged, target)
        .await
        .map_err(|e| SyncError::local_io(target, e))
}

/// Sets the file's modification time, so later timestamp comparisons line up with the remote.
pub(crate) async fn set_modified(path: &Path, at: DateTime<Utc>) -> Result<(), SyncError> {
    let owned = path.to_path_buf();
    let res = tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&owned)?;
        file.set_modified(SystemTime::from(at))
    })
    .await
    .map_err(std::io::Error::other)
    .and_then(|inner| inner);
    res.map_err(|e| SyncError::local_io(path, e))
}

/// Best-effort removal of a staging file.
pub(crate) async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_paths_stay_beside_the_target() {
        let target = Path::new("/data/app.db");
        let staged = staging_path(target, "download");
        assert_eq!(staged.parent(), target.parent());
        let name = staged.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("app.db.download-"));
        assert!(name.ends_with(".tmp"));
        assert_ne!(staged, staging_path(target, "download"));
        assert_eq!(with_suffix(target, "-wal"), PathBuf::from("/data/app.db-wal"));
    }

    #[tokio::test]
    async fn missing_file_has_no_timestamp() {
        let path = std::env::temp_dir().join(format!(
            "blobsync-missing-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        assert!(local_modified(&path).await.unwrap().is_none());
    }
}
