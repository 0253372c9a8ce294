//! Queue of storage prefixes to empty, drained by the cleanup worker.

use crate::domain::model::StorageDeletionJob;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS storage_deletion_job (
    object_prefix text PRIMARY KEY,
    attempts integer NOT NULL DEFAULT 0,
    last_error text,
    next_attempt_ts timestamptz NOT NULL DEFAULT now(),
    created_ts timestamptz NOT NULL DEFAULT now(),
    updated_ts timestamptz NOT NULL DEFAULT now()
)";

/// Makes sure the queue table exists, also on databases that were never migrated.
pub async fn init_storage_cleanup<'e, E: PgExecutor<'e>>(executor: E) -> Result<()> {
    sqlx::query(TABLE_SQL).execute(executor).await?;
    Ok(())
}

/// Queues a prefix for deletion, or makes an existing job due now.
pub async fn enqueue_deletion<'e, E: PgExecutor<'e>>(executor: E, object_prefix: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO storage_deletion_job (object_prefix, attempts, next_attempt_ts) \
         VALUES ($1, 0, now()) \
         ON CONFLICT (object_prefix) DO UPDATE SET \
           next_attempt_ts = EXCLUDED.next_attempt_ts, \
           updated_ts = now()",
    )
    .bind(object_prefix)
    .execute(executor)
    .await?;
    tracing::info!("🧹 Queued storage deletion for {}", object_prefix);
    Ok(())
}

pub async fn due_jobs<'e, E: PgExecutor<'e>>(executor: E, limit: i64) -> Result<Vec<StorageDeletionJob>> {
    Ok(sqlx::query_as::<_, StorageDeletionJob>(
        "SELECT object_prefix, attempts, last_error, next_attempt_ts \
         FROM storage_deletion_job \
         WHERE next_attempt_ts <= now() \
         ORDER BY next_attempt_ts ASC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(executor)
    .await?)
}

pub async fn complete_job<'e, E: PgExecutor<'e>>(executor: E, object_prefix: &str) -> Result<()> {
    sqlx::query("DELETE FROM storage_deletion_job WHERE object_prefix = $1")
        .bind(object_prefix)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn reschedule_job<'e, E: PgExecutor<'e>>(
    executor: E,
    object_prefix: &str,
    error: &str,
    next_attempt: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE storage_deletion_job SET \
           attempts = attempts + 1, \
           last_error = $2, \
           next_attempt_ts = $3, \
           updated_ts = now() \
         WHERE object_prefix = $1",
    )
    .bind(object_prefix)
    .bind(error)
    .bind(next_attempt)
    .execute(executor)
    .await?;
    Ok(())
}
