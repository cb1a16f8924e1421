//! SQLite pool shared by the crawl loop and the CLI commands.
//!
//! The crawler is the single writer, but `ocrawl origins` or a second
//! `add-origin` may read or write while a cycle is running. WAL mode plus a
//! generous busy timeout lets those wait for the lock instead of failing
//! with `SQLITE_BUSY` mid-cycle.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;

use crate::config::Config;

/// How long a connection waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// The engine holds at most one transaction at a time; a few extra
/// connections cover concurrent status readers.
const MAX_CONNECTIONS: u32 = 4;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        // source_detail -> source -> origin references are enforced
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> Config {
        parse_config(&format!(
            r#"
[db]
path = "{}"

[crawl]
check_history_offset_ms = 1000
supported_filetypes = ["csv"]
root_path = "{}"
log_level = "info"
"#,
            tmp.path().join("nested/dir/ocrawl.sqlite").display(),
            tmp.path().display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn connect_creates_file_and_sets_pragmas() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);
        let pool = connect(&config).await.unwrap();
        assert!(config.db.path.exists());

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(busy_timeout, BUSY_TIMEOUT.as_millis() as i64);

        let journal: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn orphan_detail_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let pool = connect(&config_in(&tmp)).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();

        let result = sqlx::query("INSERT INTO source_detail (id, source_id) VALUES (101, 999)")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
