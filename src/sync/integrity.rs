use sqlx::{ConnectOptions, Connection, sqlite::SqliteConnectOptions};
use std::{path::Path, time::Duration};
use tokio::io::AsyncReadExt;
use tracing::debug;

const HEADER_LEN: usize = 100;
const MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Result of checking a candidate database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Usable,
    Corrupt(String),
}

impl Verdict {
    pub fn is_usable(&self) -> bool {
        matches!(self, Verdict::Usable)
    }
}

/// Classifies a database file as usable or corrupt without ever writing to it.
///
/// Two stages: a header check that needs no engine (magic, page size, and the file length
/// implied by the in-header page count, which catches truncated downloads), then a read-only
/// immutable connection that reads the schema catalog under a deadline.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    timeout: Duration,
    quick_check: bool,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), false)
    }
}

impl IntegrityVerifier {
    pub fn new(timeout: Duration, quick_check: bool) -> Self {
        Self {
            timeout,
            quick_check,
        }
    }

    pub async fn verify(&self, path: &Path) -> Verdict {
        if let Err(reason) = read_and_check_header(path).await {
            debug!(path = %path.display(), %reason, "Header check failed");
            return Verdict::Corrupt(reason);
        }

        match tokio::time::timeout(self.timeout, self.engine_check(path)).await {
            Ok(Ok(())) => Verdict::Usable,
            Ok(Err(reason)) => {
                debug!(path = %path.display(), %reason, "Engine check failed");
                Verdict::Corrupt(reason)
            }
            Err(_) => Verdict::Corrupt(format!(
                "integrity check did not finish within {:?}",
                self.timeout
            )),
        }
    }

    /// The header stage alone. Safe on a file that is open elsewhere.
    pub async fn verify_header(&self, path: &Path) -> Verdict {
        match read_and_check_header(path).await {
            Ok(()) => Verdict::Usable,
            Err(reason) => {
                debug!(path = %path.display(), %reason, "Header check failed");
                Verdict::Corrupt(reason)
            }
        }
    }

    async fn engine_check(&self, path: &Path) -> Result<(), String> {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .immutable(true)
            .create_if_missing(false)
            .connect()
            .await
            .map_err(|e| format!("open failed: {e}"))?;

        let checked = async {
            let _tables: i64 = sqlx::query_scalar("SELECT count(*) FROM sqlite_master")
                .fetch_one(&mut conn)
                .await
                .map_err(|e| format!("catalog read failed: {e}"))?;

            if self.quick_check {
                let result: String = sqlx::query_scalar("PRAGMA quick_check")
                    .fetch_one(&mut conn)
                    .await
                    .map_err(|e| format!("quick_check failed: {e}"))?;
                if result != "ok" {
                    return Err(format!("quick_check reported: {result}"));
                }
            }
            Ok(())
        }
        .await;

        let _ = conn.close().await;
        checked
    }
}

async fn read_and_check_header(path: &Path) -> Result<(), String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("cannot open: {e}"))?;
    let file_len = file
        .metadata()
        .await
        .map_err(|e| format!("cannot stat: {e}"))?
        .len();

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .await
        .map_err(|_| format!("file is {file_len} bytes, shorter than the database header"))?;
    check_header(&header, file_len)
}

fn check_header(header: &[u8; HEADER_LEN], file_len: u64) -> Result<(), String> {
    if &header[..16] != MAGIC {
        return Err("missing SQLite magic header".to_string());
    }

    let raw_page_size = u16::from_be_bytes([header[16], header[17]]);
    let page_size: u64 = if raw_page_size == 1 {
        65_536
    } else {
        u64::from(raw_page_size)
    };
    if !(512..=65_536).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(format!("invalid page size {raw_page_size}"));
    }
    if file_len % page_size != 0 {
        return Err(format!(
            "file length {file_len} is not a multiple of the page size {page_size}"
        ));
    }

    let read_u32 = |at: usize| {
        u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };
    let change_counter = read_u32(24);
    let page_count = u64::from(read_u32(28));
    let valid_for = read_u32(92);

    // The in-header page count is only trustworthy when written by a writer that also
    // maintains the version-valid-for field.
    if page_count > 0 && change_counter == valid_for {
        let expected = page_count * page_size;
        if file_len < expected {
            return Err(format!(
                "file is truncated: {file_len} bytes, header declares {page_count} pages ({expected} bytes)"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(page_size: u16, page_count: u32, counter: u32, valid_for: u32) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[..16].copy_from_slice(MAGIC);
        h[16..18].copy_from_slice(&page_size.to_be_bytes());
        h[24..28].copy_from_slice(&counter.to_be_bytes());
        h[28..32].copy_from_slice(&page_count.to_be_bytes());
        h[92..96].copy_from_slice(&valid_for.to_be_bytes());
        h
    }

    #[test]
    fn accepts_consistent_header() {
        assert!(check_header(&header(4096, 3, 7, 7), 3 * 4096).is_ok());
        // Growth beyond the declared count is fine; a stale counter is ignored.
        assert!(check_header(&header(4096, 3, 7, 7), 5 * 4096).is_ok());
        assert!(check_header(&header(4096, 9, 8, 7), 3 * 4096).is_ok());
        // Page size 1 encodes 65536.
        assert!(check_header(&header(1, 1, 1, 1), 65_536).is_ok());
    }

    #[test]
    fn rejects_truncated_and_malformed_headers() {
        let truncated = check_header(&header(4096, 10, 2, 2), 4 * 4096).unwrap_err();
        assert!(truncated.contains("truncated"), "{truncated}");

        let ragged = check_header(&header(4096, 1, 1, 1), 4096 + 10).unwrap_err();
        assert!(ragged.contains("multiple"), "{ragged}");

        assert!(check_header(&header(1000, 1, 1, 1), 4000).is_err());

        let mut not_sqlite = header(4096, 1, 1, 1);
        not_sqlite[0] = b'X';
        assert!(check_header(&not_sqlite, 4096).is_err());
    }

    #[tokio::test]
    async fn missing_and_garbage_files_are_corrupt() {
        let dir = std::env::temp_dir().join(format!(
            "blobsync-integrity-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let verifier = IntegrityVerifier::default();

        assert!(!verifier.verify(&dir.join("absent.db")).await.is_usable());

        let garbage = dir.join("garbage.db");
        std::fs::write(&garbage, vec![0x42u8; 8192]).unwrap();
        assert!(matches!(
            verifier.verify(&garbage).await,
            Verdict::Corrupt(_)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
