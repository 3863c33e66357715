//! Management API handlers.
//!
//! Thin wrappers around the store and the pipeline services: request/response
//! mapping, validation at the boundary, status-code selection. Business logic
//! stays in the services.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use super::extractors::{ChannelListParams, EpisodeListParams, RefreshParams, RequestContext};
use super::responses::ApiError;
use super::AppState;
use crate::errors::{AppError, StoreError};
use crate::models::*;
use crate::refresh::{RefreshResult, RefreshTrigger};

fn store_error(err: StoreError, ctx: &RequestContext) -> ApiError {
    ApiError::from_app(AppError::Store(err), ctx.request_id)
}

fn app_error(err: anyhow::Error, ctx: &RequestContext) -> ApiError {
    match err.downcast::<StoreError>() {
        Ok(store) => store_error(store, ctx),
        Err(other) => {
            error!(request_id = %ctx.request_id, "Internal error: {:#}", other);
            ApiError::internal(ctx.request_id)
        }
    }
}

// Health

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// Aggregate status

pub async fn status(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<StatusSummary>, ApiError> {
    let (channels_enabled, channels_disabled) = state
        .database
        .channel_counts()
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let episodes_by_status = state
        .database
        .episode_counts_by_status()
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let queue_by_status = state
        .database
        .queue_counts_by_status()
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let last_refresh_at = state
        .database
        .latest_refresh_at()
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let storage_bytes = state.storage.disk_usage().await;

    let next_refresh_at = last_refresh_at
        .map(|last| last + Duration::seconds(state.config.refresh.poll_interval as i64));

    Ok(Json(StatusSummary {
        channels_enabled,
        channels_disabled,
        episodes_by_status,
        queue_by_status,
        storage_bytes,
        last_refresh_at,
        next_refresh_at,
    }))
}

// Queue inspection

#[derive(Debug, Serialize)]
pub struct QueueOverview {
    pub summary: Vec<StatusCount>,
    pub in_progress: Vec<QueueItemView>,
    pub failed: Vec<QueueItemView>,
}

pub async fn queue_overview(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<QueueOverview>, ApiError> {
    let summary = state
        .database
        .queue_counts_by_status()
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let in_progress = state
        .database
        .list_queue_items(QueueStatus::InProgress)
        .await
        .map_err(|e| store_error(e, &ctx))?;
    let failed = state
        .database
        .list_queue_items(QueueStatus::Failed)
        .await
        .map_err(|e| store_error(e, &ctx))?;

    Ok(Json(QueueOverview {
        summary,
        in_progress,
        failed,
    }))
}

// Channels

pub async fn list_channels(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<ChannelListParams>,
) -> Result<Json<ChannelListResponse>, ApiError> {
    let query = params
        .into_query()
        .map_err(|message| ApiError::validation(message, ctx.request_id))?;

    state
        .database
        .list_channels(&query)
        .await
        .map(Json)
        .map_err(|e| store_error(e, &ctx))
}

pub async fn create_channel(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<ChannelCreateRequest>,
) -> Result<Json<Channel>, ApiError> {
    validate_channel_create(&payload, &ctx)?;

    match state.database.create_channel(&payload).await {
        Ok(channel) => Ok(Json(channel)),
        Err(StoreError::Duplicate { .. }) => Err(ApiError::conflict(
            format!("a channel with url {} already exists", payload.url),
            ctx.request_id,
        )),
        Err(e) => Err(store_error(e, &ctx)),
    }
}

pub async fn get_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Channel>, ApiError> {
    match state.database.get_channel(id).await {
        Ok(Some(channel)) => Ok(Json(channel)),
        Ok(None) => Err(ApiError::not_found(
            format!("channel {id} not found"),
            ctx.request_id,
        )),
        Err(e) => Err(store_error(e, &ctx)),
    }
}

pub async fn update_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<ChannelUpdateRequest>,
) -> Result<Json<Channel>, ApiError> {
    if let Some(window) = payload.window_size {
        if !(1..=1000).contains(&window) {
            return Err(ApiError::validation(
                format!("window_size must be within 1..=1000, got {window}"),
                ctx.request_id,
            )
            .with_field("window_size"));
        }
    }

    match state.database.update_channel(id, &payload).await {
        Ok(Some(channel)) => Ok(Json(channel)),
        Ok(None) => Err(ApiError::not_found(
            format!("channel {id} not found"),
            ctx.request_id,
        )),
        Err(e) => Err(store_error(e, &ctx)),
    }
}

pub async fn delete_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<axum::http::StatusCode, ApiError> {
    let Some(channel) = state
        .database
        .get_channel(id)
        .await
        .map_err(|e| store_error(e, &ctx))?
    else {
        return Err(ApiError::not_found(
            format!("channel {id} not found"),
            ctx.request_id,
        ));
    };

    // Files first: once the row cascade runs there is nothing left pointing
    // at them.
    state
        .retention
        .purge_channel_files(&channel)
        .await
        .map_err(|e| app_error(e, &ctx))?;

    state
        .database
        .delete_channel(id)
        .await
        .map_err(|e| store_error(e, &ctx))?;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

// Episodes

pub async fn list_channel_episodes(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<EpisodeListParams>,
) -> Result<Json<Vec<Episode>>, ApiError> {
    if state
        .database
        .get_channel(id)
        .await
        .map_err(|e| store_error(e, &ctx))?
        .is_none()
    {
        return Err(ApiError::not_found(
            format!("channel {id} not found"),
            ctx.request_id,
        ));
    }

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(EpisodeStatus::parse(raw).ok_or_else(|| {
            ApiError::validation(format!("invalid status: {raw}"), ctx.request_id)
                .with_field("status")
        })?),
    };

    state
        .database
        .list_channel_episodes(id, status, params.limit.unwrap_or(0))
        .await
        .map(Json)
        .map_err(|e| store_error(e, &ctx))
}

pub async fn get_episode(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Episode>, ApiError> {
    match state.database.get_episode(id).await {
        Ok(Some(episode)) => Ok(Json(episode)),
        Ok(None) => Err(ApiError::not_found(
            format!("episode {id} not found"),
            ctx.request_id,
        )),
        Err(e) => Err(store_error(e, &ctx)),
    }
}

pub async fn delete_episode(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<axum::http::StatusCode, ApiError> {
    let Some(episode) = state
        .database
        .get_episode(id)
        .await
        .map_err(|e| store_error(e, &ctx))?
    else {
        return Err(ApiError::not_found(
            format!("episode {id} not found"),
            ctx.request_id,
        ));
    };

    if episode.status.is_in_flight() {
        return Err(ApiError::conflict(
            format!(
                "episode {id} is {} and cannot be deleted",
                episode.status.as_str()
            ),
            ctx.request_id,
        ));
    }

    state
        .retention
        .remove_episode_files(&episode)
        .await
        .map_err(|e| app_error(e, &ctx))?;

    state
        .database
        .delete_episode(episode.id, episode.channel_id)
        .await
        .map_err(|e| store_error(e, &ctx))?;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn retry_episode(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Episode>, ApiError> {
    let Some(episode) = state
        .database
        .get_episode(id)
        .await
        .map_err(|e| store_error(e, &ctx))?
    else {
        return Err(ApiError::not_found(
            format!("episode {id} not found"),
            ctx.request_id,
        ));
    };

    if episode.status != EpisodeStatus::Failed {
        return Err(ApiError::conflict(
            format!(
                "episode {id} is {}, only failed episodes can be retried",
                episode.status.as_str()
            ),
            ctx.request_id,
        ));
    }

    state
        .database
        .reset_episode_for_retry(id)
        .await
        .map_err(|e| store_error(e, &ctx))?;
    state
        .database
        .requeue_episode(id)
        .await
        .map_err(|e| store_error(e, &ctx))?;

    info!(request_id = %ctx.request_id, "Episode ({}) reset for retry", id);

    match state.database.get_episode(id).await {
        Ok(Some(episode)) => Ok(Json(episode)),
        Ok(None) => Err(ApiError::internal(ctx.request_id)),
        Err(e) => Err(store_error(e, &ctx)),
    }
}

// Refresh triggers

pub async fn refresh_channel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Option<Json<RefreshParams>>,
) -> Result<Json<RefreshResult>, ApiError> {
    let force = payload.map(|Json(p)| p.force).unwrap_or(false);

    let Some(channel) = state
        .database
        .get_channel(id)
        .await
        .map_err(|e| store_error(e, &ctx))?
    else {
        return Err(ApiError::not_found(
            format!("channel {id} not found"),
            ctx.request_id,
        ));
    };

    state
        .refresh
        .refresh_channel(&channel, RefreshTrigger::Manual { force })
        .await
        .map(Json)
        .map_err(|e| app_error(e, &ctx))
}

pub async fn refresh_all(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Option<Json<RefreshParams>>,
) -> Result<Json<Vec<RefreshResult>>, ApiError> {
    let force = payload.map(|Json(p)| p.force).unwrap_or(false);

    state
        .refresh
        .refresh_all(force)
        .await
        .map(Json)
        .map_err(|e| app_error(e, &ctx))
}

fn validate_channel_create(
    payload: &ChannelCreateRequest,
    ctx: &RequestContext,
) -> Result<(), ApiError> {
    let url = Url::parse(&payload.url).map_err(|e| {
        ApiError::validation(format!("invalid url: {e}"), ctx.request_id).with_field("url")
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(
            ApiError::validation("url scheme must be http or https", ctx.request_id)
                .with_field("url"),
        );
    }

    if payload.title.trim().is_empty() {
        return Err(
            ApiError::validation("title must not be empty", ctx.request_id).with_field("title"),
        );
    }

    if let Some(window) = payload.window_size {
        if !(1..=1000).contains(&window) {
            return Err(ApiError::validation(
                format!("window_size must be within 1..=1000, got {window}"),
                ctx.request_id,
            )
            .with_field("window_size"));
        }
    }

    Ok(())
}
