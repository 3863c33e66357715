use chrono::Utc;
use sqlx::Row;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Database;
use crate::errors::StoreError;
use crate::models::*;
use crate::utils::parse_datetime;

fn row_to_episode(row: &sqlx::sqlite::SqliteRow) -> Result<Episode, StoreError> {
    let status_str: String = row.get("status");
    let status = EpisodeStatus::parse(&status_str)
        .ok_or_else(|| StoreError::decode_failed("status", &status_str))?;

    let created_at = row.get::<String, _>("created_at");
    let updated_at = row.get::<String, _>("updated_at");
    let published_at = row.get::<Option<String>, _>("published_at");
    let downloaded_at = row.get::<Option<String>, _>("downloaded_at");

    Ok(Episode {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| StoreError::decode_failed("id", e.to_string()))?,
        channel_id: Uuid::parse_str(&row.get::<String, _>("channel_id"))
            .map_err(|e| StoreError::decode_failed("channel_id", e.to_string()))?,
        video_id: row.get("video_id"),
        title: row.get("title"),
        description: row.get("description"),
        thumbnail_url: row.get("thumbnail_url"),
        duration_seconds: row.get("duration_seconds"),
        published_at: published_at.map(|s| parse_datetime(&s)).transpose()?,
        downloaded_at: downloaded_at.map(|s| parse_datetime(&s)).transpose()?,
        file_path_audio: row.get("file_path_audio"),
        file_size_audio: row.get("file_size_audio"),
        file_path_video: row.get("file_path_video"),
        file_size_video: row.get("file_size_video"),
        status,
        retry_count: row.get("retry_count"),
        error_message: row.get("error_message"),
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

const EPISODE_COLUMNS: &str = "id, channel_id, video_id, title, description, thumbnail_url, \
     duration_seconds, published_at, downloaded_at, file_path_audio, file_size_audio, \
     file_path_video, file_size_video, status, retry_count, error_message, \
     created_at, updated_at";

impl Database {
    /// Insert a freshly discovered episode in `pending` state. A duplicate
    /// `video_id` surfaces as [`StoreError::Duplicate`], which refresh
    /// consumes as its deduplication signal.
    pub async fn create_episode(&self, new: &NewEpisode) -> Result<Episode, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO episodes
             (id, channel_id, video_id, title, description, thumbnail_url,
              duration_seconds, published_at, status, retry_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new.channel_id.to_string())
        .bind(&new.video_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.thumbnail_url)
        .bind(new.duration_seconds)
        .bind(new.published_at.map(|t| t.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::from_sqlx(e, &new.video_id))?;

        self.invalidate_channel(new.channel_id);

        Ok(Episode {
            id,
            channel_id: new.channel_id,
            video_id: new.video_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            thumbnail_url: new.thumbnail_url.clone(),
            duration_seconds: new.duration_seconds,
            published_at: new.published_at,
            downloaded_at: None,
            file_path_audio: None,
            file_size_audio: None,
            file_path_video: None,
            file_size_video: None,
            status: EpisodeStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_episode).transpose()
    }

    pub async fn get_episode_by_video_id(
        &self,
        video_id: &str,
    ) -> Result<Option<Episode>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE video_id = ?"
        ))
        .bind(video_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_episode).transpose()
    }

    /// Episodes of a channel, newest published first. `status` narrows the
    /// listing; `limit` of 0 means unbounded.
    pub async fn list_channel_episodes(
        &self,
        channel_id: Uuid,
        status: Option<EpisodeStatus>,
        limit: u32,
    ) -> Result<Vec<Episode>, StoreError> {
        let status_clause = if status.is_some() {
            "AND status = ?"
        } else {
            ""
        };
        let limit_clause = if limit > 0 { "LIMIT ?" } else { "" };

        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes
             WHERE channel_id = ? {status_clause}
             ORDER BY published_at IS NULL, published_at DESC, created_at DESC {limit_clause}"
        );
        let mut query = sqlx::query(&sql).bind(channel_id.to_string());
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if limit > 0 {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(self.pool()).await?;
        rows.iter().map(row_to_episode).collect()
    }

    /// Completed episodes beyond the channel's rolling window, i.e. the
    /// eviction candidates, oldest published last.
    pub async fn list_evictable_episodes(
        &self,
        channel_id: Uuid,
        window_size: i64,
    ) -> Result<Vec<Episode>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes
             WHERE channel_id = ? AND status = 'completed'
             ORDER BY published_at IS NULL, published_at DESC, created_at DESC
             LIMIT -1 OFFSET ?"
        ))
        .bind(channel_id.to_string())
        .bind(window_size)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_episode).collect()
    }

    pub async fn mark_episode_processing(&self, id: Uuid) -> Result<(), StoreError> {
        self.set_episode_status(id, EpisodeStatus::Processing, None).await
    }

    /// Flip a finished episode to `completed`, recording produced file
    /// paths/sizes and clearing any stale error.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_episode_completed(
        &self,
        id: Uuid,
        channel_id: Uuid,
        file_path_audio: Option<&str>,
        file_size_audio: Option<i64>,
        file_path_video: Option<&str>,
        file_size_video: Option<i64>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE episodes
             SET status = 'completed', downloaded_at = ?, error_message = NULL,
                 file_path_audio = ?, file_size_audio = ?,
                 file_path_video = ?, file_size_video = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(file_path_audio)
        .bind(file_size_audio)
        .bind(file_path_video)
        .bind(file_size_video)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        info!("Episode ({}) completed", id);
        self.invalidate_channel(channel_id);
        Ok(())
    }

    pub async fn mark_episode_failed(
        &self,
        id: Uuid,
        channel_id: Uuid,
        error_message: &str,
        retry_count: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE episodes
             SET status = 'failed', error_message = ?, retry_count = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error_message)
        .bind(retry_count)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        warn!("Episode ({}) terminally failed: {}", id, error_message);
        self.invalidate_channel(channel_id);
        Ok(())
    }

    /// Return an in-flight episode to `pending` (retry scheduled, or the
    /// claim released at shutdown). Clears the error so that I3 holds.
    pub async fn revert_episode_pending(
        &self,
        id: Uuid,
        retry_count: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE episodes
             SET status = 'pending', error_message = NULL, retry_count = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(retry_count)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Manual retry of a terminally failed episode: back to `pending` with
    /// the retry budget reset.
    pub async fn reset_episode_for_retry(&self, id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE episodes
             SET status = 'pending', error_message = NULL, retry_count = 0, updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Retention eviction: files are gone, path and size columns are nulled,
    /// the episode only remains as a tombstone for deduplication.
    pub async fn mark_episode_deleted(&self, id: Uuid, channel_id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE episodes
             SET status = 'deleted', file_path_audio = NULL, file_size_audio = NULL,
                 file_path_video = NULL, file_size_video = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        self.invalidate_channel(channel_id);
        Ok(())
    }

    pub async fn delete_episode(&self, id: Uuid, channel_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM episodes WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(|e| {
                error!("Failed to delete episode ({}): {}", id, e);
                e
            })?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted episode ({})", id);
            self.invalidate_channel(channel_id);
        }

        Ok(deleted)
    }

    pub async fn episode_counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM episodes GROUP BY status")
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

    async fn set_episode_status(
        &self,
        id: Uuid,
        status: EpisodeStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("UPDATE episodes SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_message)
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;

        Ok(())
    }
}
