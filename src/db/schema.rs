//! Schema initialization for freshly created (or freshly downloaded) databases.

use sqlx::SqlitePool;

/// Applies a `;`-separated DDL script. Statements are expected to be idempotent
/// (`CREATE ... IF NOT EXISTS`), since the script runs on every open.
pub async fn apply_schema(pool: &SqlitePool, script: &str) -> Result<(), sqlx::Error> {
    for stmt in script.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
