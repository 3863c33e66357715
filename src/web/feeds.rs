//! Feed and media delivery handlers.
//!
//! Feeds are served from the in-memory cache when fresh, rendering on demand
//! after invalidation. Conditional requests (`If-None-Match`,
//! `If-Modified-Since`) are answered from the cached ETag and last-modified
//! values. Media enclosures stream straight off the library directory.

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::error;
use uuid::Uuid;

use super::AppState;
use crate::feeds::cache::{CachedFeed, FeedKey};
use crate::feeds::FeedVariant;
use crate::models::{Channel, Episode, EpisodeStatus};
use crate::storage::MediaKind;

const CACHE_CONTROL: &str = "public, max-age=300";

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
const ATOM_CONTENT_TYPE: &str = "application/atom+xml; charset=utf-8";

pub async fn channel_audio_feed(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    serve_channel_feed(state, id, FeedVariant::Audio, headers).await
}

pub async fn channel_video_feed(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    serve_channel_feed(state, id, FeedVariant::Video, headers).await
}

pub async fn channel_atom_feed(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    serve_channel_feed(state, id, FeedVariant::Atom, headers).await
}

pub async fn combined_audio_feed(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_combined_feed(state, MediaKind::Audio, headers).await
}

pub async fn combined_video_feed(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_combined_feed(state, MediaKind::Video, headers).await
}

async fn serve_channel_feed(
    state: AppState,
    channel_id: Uuid,
    variant: FeedVariant,
    headers: HeaderMap,
) -> Response {
    let key = FeedKey::Channel(channel_id, variant);
    let content_type = match variant {
        FeedVariant::Atom => ATOM_CONTENT_TYPE,
        _ => RSS_CONTENT_TYPE,
    };

    if let Some(cached) = state.feed_cache.get(&key).await {
        return feed_response(&cached, &headers, content_type);
    }

    let channel = match state.database.get_channel(channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Feed lookup failed for channel ({}): {}", channel_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let episodes = match state
        .database
        .list_channel_episodes(channel_id, Some(EpisodeStatus::Completed), 0)
        .await
    {
        Ok(episodes) => episodes,
        Err(e) => {
            error!("Feed episode query failed for ({}): {}", channel_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let body = match state.feed_generator.channel_feed(&channel, &episodes, variant) {
        Ok(body) => body,
        Err(e) => {
            error!("Feed rendering failed for ({}): {}", channel_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cached = cache_entry(body, feed_last_modified(Some(&channel), &episodes));
    state.feed_cache.insert(key, cached.clone()).await;

    feed_response(&cached, &headers, content_type)
}

async fn serve_combined_feed(state: AppState, kind: MediaKind, headers: HeaderMap) -> Response {
    let key = match kind {
        MediaKind::Audio => FeedKey::CombinedAudio,
        MediaKind::Video => FeedKey::CombinedVideo,
    };

    if let Some(cached) = state.feed_cache.get(&key).await {
        return feed_response(&cached, &headers, RSS_CONTENT_TYPE);
    }

    let channels = match state.database.list_all_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            error!("Combined feed channel query failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut sets: Vec<(Channel, Vec<Episode>)> = Vec::with_capacity(channels.len());
    for channel in channels {
        if !channel.enabled {
            continue;
        }
        match state
            .database
            .list_channel_episodes(channel.id, Some(EpisodeStatus::Completed), 0)
            .await
        {
            Ok(episodes) => sets.push((channel, episodes)),
            Err(e) => {
                error!("Combined feed episode query failed: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let body = match state.feed_generator.combined_feed(&sets, kind) {
        Ok(body) => body,
        Err(e) => {
            error!("Combined feed rendering failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let last_modified = sets
        .iter()
        .map(|(channel, episodes)| feed_last_modified(Some(channel), episodes))
        .max()
        .unwrap_or_else(Utc::now);

    let cached = cache_entry(body, last_modified);
    state.feed_cache.insert(key, cached.clone()).await;

    feed_response(&cached, &headers, RSS_CONTENT_TYPE)
}

/// Media enclosures: `/feeds/<slug>/<audio|video>/<filename>`. `ServeFile`
/// brings range request and content-type handling; the storage resolver
/// rejects traversal before any filesystem access.
pub async fn serve_media(
    Path((slug, kind, filename)): Path<(String, String, String)>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    let Some(kind) = MediaKind::parse(&kind) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let relative = format!("{}/{}/{}", slug, kind.as_str(), filename);
    let Some(path) = state.storage.resolve(&relative) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            error!("Media serving failed for {}: {}", relative, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn cache_entry(body: Vec<u8>, last_modified: DateTime<Utc>) -> CachedFeed {
    let digest = Sha256::digest(&body);
    let mut etag = String::with_capacity(digest.len() * 2 + 2);
    etag.push('"');
    for byte in digest {
        etag.push_str(&format!("{byte:02x}"));
    }
    etag.push('"');

    CachedFeed {
        body: Arc::new(body),
        etag,
        last_modified,
    }
}

/// The newest write among the channel row and its episodes; what the
/// `Last-Modified` header advertises.
fn feed_last_modified(channel: Option<&Channel>, episodes: &[Episode]) -> DateTime<Utc> {
    episodes
        .iter()
        .map(|e| e.updated_at)
        .chain(channel.map(|c| c.updated_at))
        .max()
        .unwrap_or_else(Utc::now)
}

fn feed_response(cached: &CachedFeed, request_headers: &HeaderMap, content_type: &str) -> Response {
    if client_cache_is_fresh(cached, request_headers) {
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, cached.etag.clone()),
                (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
            ],
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::ETAG, cached.etag.clone()),
            (header::LAST_MODIFIED, httpdate(cached.last_modified)),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
        ],
        cached.body.as_ref().clone(),
    )
        .into_response()
}

fn client_cache_is_fresh(cached: &CachedFeed, headers: &HeaderMap) -> bool {
    if let Some(candidates) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        return candidates
            .split(',')
            .any(|candidate| candidate.trim() == cached.etag || candidate.trim() == "*");
    }

    if let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    {
        // HTTP dates carry second precision
        return cached.last_modified.timestamp() <= since.timestamp();
    }

    false
}

fn httpdate(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
