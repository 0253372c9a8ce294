//! Background worker that empties storage prefixes queued for deletion.

use crate::db::storage_jobs;
use crate::domain::ports::ObjectStorage;
use crate::utils::error::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_JOBS: i64 = 20;
const MAX_BACKOFF_MINUTES: i64 = 60;
const MAX_ERROR_LEN: usize = 1000;

/// Minutes until the next try after `attempts` failures, capped at an hour.
pub fn backoff_minutes(attempts: i32) -> i64 {
    2i64.saturating_pow(attempts.max(0) as u32)
        .min(MAX_BACKOFF_MINUTES)
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}

#[derive(Clone)]
pub struct StorageCleanup {
    pool: PgPool,
    storage: Arc<dyn ObjectStorage>,
}

impl StorageCleanup {
    pub fn new(pool: PgPool, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { pool, storage }
    }

    /// Runs the due jobs once. Returns how many prefixes were emptied.
    pub async fn process_storage_deletion_jobs(&self, max_jobs: i64) -> Result<usize> {
        let jobs = storage_jobs::due_jobs(&self.pool, max_jobs).await?;
        let mut done = 0;

        for job in jobs {
            match self.storage.delete_prefix(&job.object_prefix).await {
                Ok(count) => {
                    storage_jobs::complete_job(&self.pool, &job.object_prefix).await?;
                    tracing::info!(
                        "🧹 Emptied '{}' ({} objects) via cleanup job",
                        job.object_prefix,
                        count
                    );
                    done += 1;
                }
                Err(e) => {
                    let attempt = job.attempts + 1;
                    let minutes = backoff_minutes(attempt);
                    let next_attempt = Utc::now() + ChronoDuration::minutes(minutes);
                    storage_jobs::reschedule_job(
                        &self.pool,
                        &job.object_prefix,
                        &truncate_error(&e.to_string()),
                        next_attempt,
                    )
                    .await?;
                    tracing::warn!(
                        "⚠️ Rescheduled deletion of '{}' in {} min (attempt {}): {}",
                        job.object_prefix,
                        minutes,
                        attempt,
                        e
                    );
                }
            }
        }
        Ok(done)
    }

    /// Loops until `shutdown` is cancelled. A failed cycle is logged and the
    /// loop carries on.
    pub async fn start_storage_cleanup_worker(
        self,
        shutdown: CancellationToken,
        interval: Duration,
    ) -> Result<()> {
        storage_jobs::init_storage_cleanup(&self.pool).await?;
        tracing::info!("🧹 Storage cleanup worker started (every {:?})", interval);

        loop {
            if let Err(e) = self.process_storage_deletion_jobs(DEFAULT_MAX_JOBS).await {
                tracing::error!("❌ Storage cleanup cycle failed: {}", e);
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Storage cleanup worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_minutes() {
        assert_eq!(backoff_minutes(1), 2);
        assert_eq!(backoff_minutes(2), 4);
        assert_eq!(backoff_minutes(5), 32);
        assert_eq!(backoff_minutes(6), 60);
        assert_eq!(backoff_minutes(40), 60);
    }

    #[test]
    fn test_truncate_error() {
        let long = "x".repeat(1500);
        assert_eq!(truncate_error(&long).len(), 1000);
        assert_eq!(truncate_error("boom"), "boom");
    }
}
