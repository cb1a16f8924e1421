//! Atomic persistence of one discovered item.
//!
//! A `source` row and its `source_detail` row are written in a single
//! transaction: the detail insert only runs after the source insert
//! succeeded, and any failure drops the transaction, which rolls back the
//! source row. Readers never observe a source without its detail.

use sqlx::SqlitePool;

use crate::error::IngestError;
use crate::models::{to_millis, NewSource, NewSourceDetail};

/// Inserts `source` then `detail`, returning the new source id.
pub async fn ingest_source(
    pool: &SqlitePool,
    source: &NewSource,
    detail: &NewSourceDetail,
) -> Result<i64, IngestError> {
    let mut tx = pool.begin().await.map_err(IngestError::Begin)?;

    let source_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO source (origin_id, author_id, spam_score, published_time)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(source.origin_id)
    .bind(source.author_id)
    .bind(source.spam_score)
    .bind(to_millis(source.published_time))
    .fetch_one(&mut *tx)
    .await
    .map_err(IngestError::Source)?;

    let native_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO source_detail (id, source_id, message_text, views_count, shares_count)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(detail.native_id)
    .bind(source_id)
    .bind(&detail.message_text)
    .bind(detail.views_count)
    .bind(detail.shares_count)
    .fetch_one(&mut *tx)
    .await
    .map_err(IngestError::Detail)?;

    // Dropping `tx` without commit rolls the source row back
    if native_id != detail.native_id {
        return Err(IngestError::DetailMismatch {
            expected: detail.native_id,
            actual: native_id,
        });
    }

    tx.commit().await.map_err(IngestError::Commit)?;
    Ok(source_id)
}
