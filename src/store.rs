//! Typed accessors over persisted origin, history and source records.
//!
//! Each operation takes a pooled connection, runs inside its own
//! transaction, and returns a [`StoreError`] on failure. Single-column
//! updates return the value the store actually wrote so callers can verify
//! the write with [`verify_written`].

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{
    from_millis, to_millis, ChannelSnapshot, Domain, NewOrigin, Origin, OriginCategory,
    OriginHistory, TrackedOrigin,
};

/// Per-origin row for status listings.
#[derive(Debug, Clone)]
pub struct OriginSummary {
    pub tracked: TrackedOrigin,
    pub source_count: i64,
}

#[derive(Debug, Clone)]
pub struct OriginStore {
    pool: SqlitePool,
}

impl OriginStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All origins of the tracked category with their latest history row.
    ///
    /// Origins without any history are returned with `latest_history: None`
    /// so they get a snapshot on their next freshness check.
    pub async fn list_tracked_origins(&self) -> Result<Vec<TrackedOrigin>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.domain, o.name, o.is_dead_score, o.category, o.last_checked, o.created_time,
                   oh.id AS history_id, oh.additional_infos, oh.updated_time
            FROM origin o
            LEFT JOIN origin_history oh ON oh.id = (
                SELECT z.id FROM origin_history z
                WHERE z.origin_id = o.id
                ORDER BY z.updated_time DESC, z.id DESC
                LIMIT 1
            )
            WHERE o.category = ?
            ORDER BY o.id ASC
            "#,
        )
        .bind(OriginCategory::TRACKED.as_i64())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.iter().map(tracked_from_row).collect()
    }

    /// Origins of the tracked category registered under `domain`.
    pub async fn find_origin_by_domain(&self, domain: &Domain) -> Result<Vec<Origin>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, domain, name, is_dead_score, category, last_checked, created_time
            FROM origin WHERE category = ? AND domain = ?
            "#,
        )
        .bind(OriginCategory::TRACKED.as_i64())
        .bind(domain.to_string())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.iter().map(origin_from_row).collect()
    }

    pub async fn get_origin(&self, origin_id: i64) -> Result<Origin, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, domain, name, is_dead_score, category, last_checked, created_time
            FROM origin WHERE id = ?
            "#,
        )
        .bind(origin_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match row {
            Some(row) => origin_from_row(&row),
            None => Err(StoreError::NotFound(origin_id)),
        }
    }

    pub async fn insert_origin(&self, origin: &NewOrigin) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO origin (domain, name, is_dead_score, category, last_checked, created_time)
            VALUES (?, ?, 0, ?, NULL, ?)
            RETURNING id
            "#,
        )
        .bind(origin.domain.to_string())
        .bind(&origin.name)
        .bind(origin.category.as_i64())
        .bind(to_millis(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Appends a history snapshot stamped with the current time.
    pub async fn append_history(
        &self,
        origin_id: i64,
        snapshot: &ChannelSnapshot,
    ) -> Result<i64, StoreError> {
        self.append_history_at(origin_id, snapshot, Utc::now()).await
    }

    pub async fn append_history_at(
        &self,
        origin_id: i64,
        snapshot: &ChannelSnapshot,
        updated_time: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let additional_infos = serde_json::to_string(snapshot)?;

        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO origin_history (origin_id, additional_infos, updated_time)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(origin_id)
        .bind(additional_infos)
        .bind(to_millis(updated_time))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Source ids already ingested for `(domain, native_id)`.
    ///
    /// Zero rows means the item is new, one means it was ingested before,
    /// more than one is an integrity anomaly.
    pub async fn find_existing_item(
        &self,
        domain: &Domain,
        native_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT s.id FROM origin o
            INNER JOIN source s ON o.id = s.origin_id
            INNER JOIN source_detail sd ON s.id = sd.source_id
            WHERE o.category = ? AND o.domain = ? AND sd.id = ?
            ORDER BY s.id ASC
            "#,
        )
        .bind(OriginCategory::TRACKED.as_i64())
        .bind(domain.to_string())
        .bind(native_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    /// Sets `is_dead_score`, returning the stored value.
    pub async fn update_dead_score(&self, origin_id: i64, score: i64) -> Result<i64, StoreError> {
        self.update_column(
            "UPDATE origin SET is_dead_score = ? WHERE id = ? RETURNING is_dead_score",
            origin_id,
            score,
        )
        .await
    }

    /// Sets `last_checked`, returning the stored value.
    pub async fn update_cursor(&self, origin_id: i64, cursor: i64) -> Result<i64, StoreError> {
        self.update_column(
            "UPDATE origin SET last_checked = ? WHERE id = ? RETURNING last_checked",
            origin_id,
            cursor,
        )
        .await
    }

    async fn update_column(
        &self,
        sql: &'static str,
        origin_id: i64,
        value: i64,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let written: Option<i64> = sqlx::query_scalar(sql)
            .bind(value)
            .bind(origin_id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        written.ok_or(StoreError::NotFound(origin_id))
    }

    /// Tracked origins with their latest snapshot and ingested source count.
    pub async fn origin_summaries(&self) -> Result<Vec<OriginSummary>, StoreError> {
        let tracked = self.list_tracked_origins().await?;

        let mut tx = self.pool.begin().await?;
        let counts: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT origin_id, COUNT(*) FROM source GROUP BY origin_id",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(tracked
            .into_iter()
            .map(|tracked| {
                let source_count = counts
                    .iter()
                    .find(|(origin_id, _)| *origin_id == tracked.origin.id)
                    .map(|(_, count)| *count)
                    .unwrap_or(0);
                OriginSummary {
                    tracked,
                    source_count,
                }
            })
            .collect())
    }
}

/// Checks a single-column write against the value the store returned.
pub fn verify_written(expected: i64, written: i64) -> Result<i64, StoreError> {
    if expected == written {
        Ok(written)
    } else {
        Err(StoreError::Verification {
            expected,
            actual: written,
        })
    }
}

fn origin_from_row(row: &SqliteRow) -> Result<Origin, StoreError> {
    let category: i64 = row.try_get("category")?;
    let category = OriginCategory::from_i64(category).ok_or_else(|| {
        StoreError::Query(sqlx::Error::Decode(
            format!("unknown origin category {}", category).into(),
        ))
    })?;

    Ok(Origin {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        name: row.try_get("name")?,
        is_dead_score: row.try_get("is_dead_score")?,
        category,
        last_checked: row.try_get("last_checked")?,
        created_time: from_millis(row.try_get("created_time")?),
    })
}

fn tracked_from_row(row: &SqliteRow) -> Result<TrackedOrigin, StoreError> {
    let origin = origin_from_row(row)?;

    let history_id: Option<i64> = row.try_get("history_id")?;
    let latest_history = match history_id {
        Some(id) => Some(OriginHistory {
            id,
            origin_id: origin.id,
            additional_infos: row.try_get("additional_infos")?,
            updated_time: from_millis(row.try_get("updated_time")?),
        }),
        None => None,
    };

    Ok(TrackedOrigin {
        origin,
        latest_history,
    })
}
