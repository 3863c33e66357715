use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Database;
use crate::errors::StoreError;
use crate::models::*;
use crate::utils::parse_datetime;

fn row_to_queue_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry, StoreError> {
    let status_str: String = row.get("status");
    let status = QueueStatus::parse(&status_str)
        .ok_or_else(|| StoreError::decode_failed("status", &status_str))?;

    let created_at = row.get::<String, _>("created_at");
    let updated_at = row.get::<String, _>("updated_at");
    let next_retry_at = row.get::<Option<String>, _>("next_retry_at");

    Ok(QueueEntry {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| StoreError::decode_failed("id", e.to_string()))?,
        episode_id: Uuid::parse_str(&row.get::<String, _>("episode_id"))
            .map_err(|e| StoreError::decode_failed("episode_id", e.to_string()))?,
        priority: row.get("priority"),
        status,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        next_retry_at: next_retry_at.map(|s| parse_datetime(&s)).transpose()?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

const QUEUE_COLUMNS: &str = "id, episode_id, priority, status, attempts, max_attempts, \
     last_error, next_retry_at, created_at, updated_at";

impl Database {
    /// Insert a pending queue entry for an episode. The UNIQUE constraint on
    /// `episode_id` guarantees at most one live entry per episode.
    pub async fn enqueue_episode(
        &self,
        episode_id: Uuid,
        priority: i64,
    ) -> Result<QueueEntry, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO download_queue
             (id, episode_id, priority, status, attempts, max_attempts, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', 0, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(episode_id.to_string())
        .bind(priority)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::from_sqlx(e, episode_id.to_string()))?;

        debug!("Queued episode ({}) at priority {}", episode_id, priority);

        Ok(QueueEntry {
            id,
            episode_id,
            priority,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Atomically claim the next due queue entry.
    ///
    /// Ordering: lowest `priority`, then oldest `created_at`, then
    /// lexicographic id. The winning entry flips to `in_progress` with
    /// `attempts` incremented, and its episode flips to `downloading`, in a
    /// single transaction. The claim mutex makes the select-then-update pair
    /// linearizable across concurrent workers.
    pub async fn claim_next(&self) -> Result<Option<QueueEntry>, StoreError> {
        let _guard = self.acquire_claim_lock().await;
        let now = Utc::now();

        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM download_queue
             WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?)
             ORDER BY priority ASC, created_at ASC, id ASC
             LIMIT 1"
        ))
        .bind(now.to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut entry = row_to_queue_entry(&row)?;

        let claimed = sqlx::query(
            "UPDATE download_queue
             SET status = 'in_progress', attempts = attempts + 1,
                 next_retry_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(entry.id.to_string())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            // Lost to a competing writer; treat as nothing available.
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("UPDATE episodes SET status = 'downloading', updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(entry.episode_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        entry.status = QueueStatus::InProgress;
        entry.attempts += 1;
        entry.next_retry_at = None;
        entry.updated_at = now;

        debug!(
            "Claimed queue entry ({}) for episode ({}), attempt {}/{}",
            entry.id, entry.episode_id, entry.attempts, entry.max_attempts
        );

        Ok(Some(entry))
    }

    pub async fn mark_queue_completed(&self, queue_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE download_queue
             SET status = 'completed', last_error = NULL, next_retry_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(queue_id.to_string())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Retryable failure: back to `pending` with the error and the backoff
    /// deadline recorded. The attempt was already counted at claim time.
    pub async fn schedule_queue_retry(
        &self,
        queue_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE download_queue
             SET status = 'pending', last_error = ?, next_retry_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(next_retry_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(queue_id.to_string())
        .execute(self.pool())
        .await?;

        info!(
            "Queue entry ({}) scheduled for retry at {}",
            queue_id,
            next_retry_at.to_rfc3339()
        );
        Ok(())
    }

    pub async fn mark_queue_failed(&self, queue_id: Uuid, error: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE download_queue
             SET status = 'failed', last_error = ?, next_retry_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(queue_id.to_string())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn cancel_queue_entry(&self, queue_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE download_queue
             SET status = 'cancelled', next_retry_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(queue_id.to_string())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Release a claim without consuming an attempt (shutdown or internal
    /// error, not a download failure). Reverts both the queue entry and its
    /// episode in one transaction.
    pub async fn release_claim(&self, queue_id: Uuid, episode_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE download_queue
             SET status = 'pending', attempts = MAX(attempts - 1, 0), updated_at = ?
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(now.to_rfc3339())
        .bind(queue_id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE episodes SET status = 'pending', error_message = NULL, updated_at = ?
             WHERE id = ? AND status IN ('downloading', 'processing')",
        )
        .bind(now.to_rfc3339())
        .bind(episode_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Released claim on queue entry ({})", queue_id);
        Ok(())
    }

    /// Manual retry support: reset an existing entry's budget, or create a
    /// fresh entry when the old one is gone.
    pub async fn requeue_episode(&self, episode_id: Uuid) -> Result<QueueEntry, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE download_queue
             SET status = 'pending', attempts = 0, last_error = NULL,
                 next_retry_at = NULL, updated_at = ?
             WHERE episode_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(episode_id.to_string())
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            return self
                .get_queue_entry_by_episode(episode_id)
                .await?
                .ok_or_else(|| StoreError::record_not_found("download_queue", episode_id.to_string()));
        }

        self.enqueue_episode(episode_id, DEFAULT_PRIORITY).await
    }

    pub async fn get_queue_entry_by_episode(
        &self,
        episode_id: Uuid,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM download_queue WHERE episode_id = ?"
        ))
        .bind(episode_id.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_queue_entry).transpose()
    }

    pub async fn queue_counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM download_queue GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        Ok(rows
            .iter()
            .map(|row| StatusCount {
                status: row.get("status"),
                count: row.get("count"),
            })
            .collect())
    }

    /// Queue entries of one status joined with their episode, for the queue
    /// inspection endpoint.
    pub async fn list_queue_items(
        &self,
        status: QueueStatus,
    ) -> Result<Vec<QueueItemView>, StoreError> {
        let rows = sqlx::query(
            "SELECT q.id AS queue_id, q.episode_id, e.video_id, e.title AS episode_title,
                    q.priority, q.status, q.attempts, q.max_attempts, q.last_error,
                    q.next_retry_at, q.updated_at
             FROM download_queue q
             JOIN episodes e ON e.id = q.episode_id
             WHERE q.status = ?
             ORDER BY q.updated_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let status_str: String = row.get("status");
            let next_retry_at = row.get::<Option<String>, _>("next_retry_at");
            let updated_at = row.get::<String, _>("updated_at");
            items.push(QueueItemView {
                queue_id: Uuid::parse_str(&row.get::<String, _>("queue_id"))
                    .map_err(|e| StoreError::decode_failed("queue_id", e.to_string()))?,
                episode_id: Uuid::parse_str(&row.get::<String, _>("episode_id"))
                    .map_err(|e| StoreError::decode_failed("episode_id", e.to_string()))?,
                video_id: row.get("video_id"),
                episode_title: row.get("episode_title"),
                priority: row.get("priority"),
                status: QueueStatus::parse(&status_str)
                    .ok_or_else(|| StoreError::decode_failed("status", &status_str))?,
                attempts: row.get("attempts"),
                max_attempts: row.get("max_attempts"),
                last_error: row.get("last_error"),
                next_retry_at: next_retry_at.map(|s| parse_datetime(&s)).transpose()?,
                updated_at: parse_datetime(&updated_at)?,
            });
        }

        Ok(items)
    }

    /// Startup recovery: any entry left `in_progress` by a previous process
    /// is returned to `pending` without consuming an attempt.
    pub async fn revert_all_in_progress(&self) -> Result<u64, StoreError> {
        self.revert_in_progress_since(Utc::now()).await
    }

    /// Reaper sweep: revert `in_progress` entries whose `updated_at` is at or
    /// before the cutoff, together with their episodes. Returns the number of
    /// reverted entries.
    pub async fn revert_in_progress_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            "SELECT id, episode_id FROM download_queue
             WHERE status = 'in_progress' AND updated_at <= ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let queue_id: String = row.get("id");
            let episode_id: String = row.get("episode_id");

            sqlx::query(
                "UPDATE download_queue
                 SET status = 'pending', attempts = MAX(attempts - 1, 0), updated_at = ?
                 WHERE id = ?",
            )
            .bind(now.to_rfc3339())
            .bind(&queue_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE episodes SET status = 'pending', error_message = NULL, updated_at = ?
                 WHERE id = ? AND status IN ('downloading', 'processing')",
            )
            .bind(now.to_rfc3339())
            .bind(&episode_id)
            .execute(&mut *tx)
            .await?;

            warn!(
                "Reverted stale in-progress queue entry ({}) for episode ({})",
                queue_id, episode_id
            );
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    /// Refresh a claimed entry's heartbeat so the reaper can tell live work
    /// from abandoned work during long downloads and transcodes.
    pub async fn touch_queue_entry(&self, queue_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE download_queue SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(queue_id.to_string())
            .execute(self.pool())
            .await?;

        Ok(())
    }
}
