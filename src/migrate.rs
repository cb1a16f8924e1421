use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Tracked origins; `domain` is a username or a numeric channel id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS origin (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            name TEXT,
            is_dead_score INTEGER NOT NULL DEFAULT 0 CHECK (is_dead_score >= 0),
            category INTEGER NOT NULL,
            last_checked INTEGER,
            created_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only metadata snapshots
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS origin_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            origin_id INTEGER NOT NULL,
            additional_infos TEXT NOT NULL,
            updated_time INTEGER NOT NULL,
            FOREIGN KEY (origin_id) REFERENCES origin(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            origin_id INTEGER NOT NULL,
            author_id INTEGER,
            spam_score INTEGER NOT NULL DEFAULT 0,
            published_time INTEGER NOT NULL,
            FOREIGN KEY (origin_id) REFERENCES origin(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `id` is the platform's native item id, not a surrogate key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_detail (
            id INTEGER NOT NULL,
            source_id INTEGER NOT NULL UNIQUE,
            message_text TEXT,
            views_count INTEGER,
            shares_count INTEGER,
            FOREIGN KEY (source_id) REFERENCES source(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_origin_category_domain ON origin(category, domain)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_origin_history_latest ON origin_history(origin_id, updated_time DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_origin ON source(origin_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_detail_native ON source_detail(id)")
        .execute(pool)
        .await?;

    Ok(())
}
