use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Database;
use crate::errors::StoreError;
use crate::models::*;
use crate::utils::parse_datetime;

fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> Result<Channel, StoreError> {
    let feed_type_str: String = row.get("feed_type");
    let feed_type = FeedType::parse(&feed_type_str)
        .ok_or_else(|| StoreError::decode_failed("feed_type", &feed_type_str))?;

    let created_at = row.get::<String, _>("created_at");
    let updated_at = row.get::<String, _>("updated_at");
    let last_refresh_at = row.get::<Option<String>, _>("last_refresh_at");

    Ok(Channel {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| StoreError::decode_failed("id", e.to_string()))?,
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        thumbnail_url: row.get("thumbnail_url"),
        window_size: row.get("window_size"),
        feed_type,
        enabled: row.get("enabled"),
        last_refresh_at: last_refresh_at.map(|s| parse_datetime(&s)).transpose()?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

const CHANNEL_COLUMNS: &str = "id, url, title, description, thumbnail_url, window_size, \
     feed_type, enabled, last_refresh_at, created_at, updated_at";

impl Database {
    pub async fn create_channel(&self, req: &ChannelCreateRequest) -> Result<Channel, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let window_size = req.window_size.unwrap_or(DEFAULT_WINDOW_SIZE);
        let feed_type = req.feed_type.unwrap_or(FeedType::Audio);
        let enabled = req.enabled.unwrap_or(true);

        info!("Creating channel '{}' ({}) for {}", req.title, id, req.url);

        sqlx::query(
            "INSERT INTO channels
             (id, url, title, description, thumbnail_url, window_size, feed_type,
              enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&req.url)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.thumbnail_url)
        .bind(window_size)
        .bind(feed_type.as_str())
        .bind(enabled)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| {
            error!("Failed to create channel '{}': {}", req.title, e);
            StoreError::from_sqlx(e, &req.url)
        })?;

        self.invalidate_all();

        Ok(Channel {
            id,
            url: req.url.clone(),
            title: req.title.clone(),
            description: req.description.clone(),
            thumbnail_url: req.thumbnail_url.clone(),
            window_size,
            feed_type,
            enabled,
            last_refresh_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_channel(&self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_channel).transpose()
    }

    pub async fn list_channels(
        &self,
        query: &ChannelQuery,
    ) -> Result<ChannelListResponse, StoreError> {
        let mut conditions = Vec::new();
        if query.enabled.is_some() {
            conditions.push("enabled = ?");
        }
        if query.feed_type.is_some() {
            conditions.push("feed_type = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let order_column = match query.sort {
            ChannelSort::CreatedAt => "created_at",
            ChannelSort::UpdatedAt => "updated_at",
            ChannelSort::LastRefreshAt => "last_refresh_at",
        };

        let page = query.page.max(1);
        let limit = query.limit.clamp(1, 1000);
        let offset = (page - 1) * limit;

        let count_sql = format!("SELECT COUNT(*) FROM channels {where_clause}");
        let mut count_query = sqlx::query_scalar(&count_sql);
        if let Some(enabled) = query.enabled {
            count_query = count_query.bind(enabled);
        }
        if let Some(feed_type) = query.feed_type {
            count_query = count_query.bind(feed_type.as_str());
        }
        let total_count: i64 = count_query.fetch_one(self.pool()).await?;

        let rows_sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels {where_clause}
             ORDER BY {order_column} DESC LIMIT ? OFFSET ?"
        );
        let mut rows_query = sqlx::query(&rows_sql);
        if let Some(enabled) = query.enabled {
            rows_query = rows_query.bind(enabled);
        }
        if let Some(feed_type) = query.feed_type {
            rows_query = rows_query.bind(feed_type.as_str());
        }
        let rows = rows_query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool())
            .await?;

        let mut channels = Vec::with_capacity(rows.len());
        for row in &rows {
            channels.push(row_to_channel(row)?);
        }

        let total_pages = ((total_count as f64) / (limit as f64)).ceil() as u32;

        Ok(ChannelListResponse {
            channels,
            total_count,
            page,
            limit,
            total_pages,
        })
    }

    /// Enabled channels in refresh order: never-refreshed first, then the
    /// most stale.
    pub async fn list_channels_for_refresh(&self) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE enabled = 1
             ORDER BY last_refresh_at IS NOT NULL, last_refresh_at ASC"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_channel).collect()
    }

    pub async fn list_all_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY title"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_channel).collect()
    }

    pub async fn update_channel(
        &self,
        id: Uuid,
        req: &ChannelUpdateRequest,
    ) -> Result<Option<Channel>, StoreError> {
        let Some(current) = self.get_channel(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let title = req.title.clone().unwrap_or(current.title);
        let description = req.description.clone().or(current.description);
        let thumbnail_url = req.thumbnail_url.clone().or(current.thumbnail_url);
        let window_size = req.window_size.unwrap_or(current.window_size);
        let feed_type = req.feed_type.unwrap_or(current.feed_type);
        let enabled = req.enabled.unwrap_or(current.enabled);

        info!("Updating channel '{}' ({})", title, id);

        let result = sqlx::query(
            "UPDATE channels
             SET title = ?, description = ?, thumbnail_url = ?, window_size = ?,
                 feed_type = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&title)
        .bind(&description)
        .bind(&thumbnail_url)
        .bind(window_size)
        .bind(feed_type.as_str())
        .bind(enabled)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .map_err(|e| {
            error!("Failed to update channel ({}): {}", id, e);
            e
        })?;

        if result.rows_affected() == 0 {
            warn!("Channel ({}) not found for update", id);
            return Ok(None);
        }

        self.invalidate_channel(id);
        self.get_channel(id).await
    }

    pub async fn touch_channel_refreshed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE channels SET last_refresh_at = ?, updated_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(at.to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;

        Ok(())
    }

    pub async fn delete_channel(&self, id: Uuid) -> Result<bool, StoreError> {
        info!("Deleting channel ({})", id);

        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(|e| {
                error!("Failed to delete channel ({}): {}", id, e);
                e
            })?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted channel ({}) and its episodes", id);
            self.invalidate_all();
        } else {
            warn!("Channel ({}) not found for deletion", id);
        }

        Ok(deleted)
    }

    pub async fn channel_counts(&self) -> Result<(i64, i64), StoreError> {
        let enabled: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE enabled = 1")
                .fetch_one(self.pool())
                .await?;
        let disabled: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE enabled = 0")
                .fetch_one(self.pool())
                .await?;

        Ok((enabled, disabled))
    }

    pub async fn latest_refresh_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT MAX(last_refresh_at) FROM channels WHERE enabled = 1")
                .fetch_one(self.pool())
                .await?;

        value.map(|s| parse_datetime(&s)).transpose().map_err(Into::into)
    }
}
