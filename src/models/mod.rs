use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A monitored upstream channel that is mirrored into the podcast library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub window_size: i64,
    pub feed_type: FeedType,
    pub enabled: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Audio,
    Video,
    Both,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Audio => "audio",
            FeedType::Video => "video",
            FeedType::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(FeedType::Audio),
            "video" => Some(FeedType::Video),
            "both" => Some(FeedType::Both),
            _ => None,
        }
    }

    pub fn wants_audio(&self) -> bool {
        matches!(self, FeedType::Audio | FeedType::Both)
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, FeedType::Video | FeedType::Both)
    }
}

/// A single upstream video mirrored (or being mirrored) into the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub file_path_audio: Option<String>,
    pub file_size_audio: Option<i64>,
    pub file_path_video: Option<String>,
    pub file_size_video: Option<i64>,
    pub status: EpisodeStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Downloading => "downloading",
            EpisodeStatus::Processing => "processing",
            EpisodeStatus::Completed => "completed",
            EpisodeStatus::Failed => "failed",
            EpisodeStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EpisodeStatus::Pending),
            "downloading" => Some(EpisodeStatus::Downloading),
            "processing" => Some(EpisodeStatus::Processing),
            "completed" => Some(EpisodeStatus::Completed),
            "failed" => Some(EpisodeStatus::Failed),
            "deleted" => Some(EpisodeStatus::Deleted),
            _ => None,
        }
    }

    /// True while a worker owns the episode's files and database row.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, EpisodeStatus::Downloading | EpisodeStatus::Processing)
    }
}

/// The work item tracking an episode through the download pipeline.
/// At most one live entry exists per episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub priority: i64,
    pub status: QueueStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "in_progress" => Some(QueueStatus::InProgress),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            "cancelled" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }
}

pub const DEFAULT_WINDOW_SIZE: i64 = 50;
pub const DEFAULT_PRIORITY: i64 = 5;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Upstream listing entry returned by the extractor's flat channel listing.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoListing {
    pub video_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Per-video metadata returned by the extractor.
#[derive(Debug, Clone, Default)]
pub struct VideoMetadata {
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Insert projection for a newly discovered episode.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub channel_id: Uuid,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCreateRequest {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub window_size: Option<i64>,
    pub feed_type: Option<FeedType>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub window_size: Option<i64>,
    pub feed_type: Option<FeedType>,
    pub enabled: Option<bool>,
}

/// Filters and ordering for the channel listing endpoint.
#[derive(Debug, Clone)]
pub struct ChannelQuery {
    pub enabled: Option<bool>,
    pub feed_type: Option<FeedType>,
    pub sort: ChannelSort,
    pub page: u32,
    pub limit: u32,
}

impl Default for ChannelQuery {
    fn default() -> Self {
        Self {
            enabled: None,
            feed_type: None,
            sort: ChannelSort::CreatedAt,
            page: 1,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSort {
    CreatedAt,
    UpdatedAt,
    LastRefreshAt,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<Channel>,
    pub total_count: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

/// Outcome of one per-channel refresh pass, reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub channel_id: Uuid,
    pub videos_seen: usize,
    pub episodes_created: usize,
    pub episodes_queued: usize,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate counts surfaced by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub channels_enabled: i64,
    pub channels_disabled: i64,
    pub episodes_by_status: Vec<StatusCount>,
    pub queue_by_status: Vec<StatusCount>,
    pub storage_bytes: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Queue entry joined with enough episode context to be readable in the API.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItemView {
    pub queue_id: Uuid,
    pub episode_id: Uuid,
    pub video_id: String,
    pub episode_title: String,
    pub priority: i64,
    pub status: QueueStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
