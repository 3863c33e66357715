//! Router-level API tests driven through `tower::ServiceExt::oneshot`
//! against an in-memory store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use tubefeed::config::{Config, DatabaseConfig};
use tubefeed::database::Database;
use tubefeed::errors::ToolError;
use tubefeed::extractor::VideoExtractor;
use tubefeed::feeds::cache::{create_cache_invalidation_channel, FeedCache};
use tubefeed::feeds::FeedGenerator;
use tubefeed::models::*;
use tubefeed::retention::RetentionService;
use tubefeed::refresh::RefreshService;
use tubefeed::storage::{MediaKind, MediaStorage};
use tubefeed::web::{AppState, RateLimiter, WebServer};

/// Extractor stub: two fixed videos for any channel.
struct StubExtractor;

#[async_trait]
impl VideoExtractor for StubExtractor {
    async fn list_channel_videos(
        &self,
        _channel_url: &str,
        limit: usize,
    ) -> Result<Vec<VideoListing>, ToolError> {
        let listings = vec![
            VideoListing {
                video_id: "stub-1".to_string(),
                title: "Stub One".to_string(),
                published_at: Some(Utc::now() - Duration::days(2)),
            },
            VideoListing {
                video_id: "stub-2".to_string(),
                title: "Stub Two".to_string(),
                published_at: Some(Utc::now() - Duration::days(1)),
            },
        ];
        Ok(listings.into_iter().take(limit).collect())
    }

    async fn fetch_video_metadata(&self, video_id: &str) -> Result<VideoMetadata, ToolError> {
        Ok(VideoMetadata {
            title: format!("Stub {video_id}"),
            ..Default::default()
        })
    }

    async fn download_video(
        &self,
        _video_id: &str,
        _dest_dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        unreachable!("no worker runs in router tests")
    }
}

struct TestApp {
    app: Router,
    database: Database,
    storage: MediaStorage,
    _dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.media_root = dir.path().to_path_buf();

    let (invalidation_tx, invalidation_rx) = create_cache_invalidation_channel();
    let feed_cache = FeedCache::new();
    feed_cache.clone().spawn_invalidation_task(invalidation_rx);

    let database = Database::new(
        &DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
        },
        invalidation_tx,
    )
    .await
    .unwrap();
    database.migrate().await.unwrap();

    let storage = MediaStorage::new(dir.path());
    storage.ensure_layout().unwrap();

    let refresh = RefreshService::new(database.clone(), Arc::new(StubExtractor), config.clone());
    let retention = RetentionService::new(database.clone(), storage.clone(), config.clone());

    let state = AppState {
        database: database.clone(),
        config: config.clone(),
        storage: storage.clone(),
        refresh,
        retention,
        feed_cache,
        feed_generator: Arc::new(FeedGenerator::new(&config.server.base_url)),
        rate_limiter: RateLimiter::new(),
    };

    TestApp {
        app: WebServer::router(state),
        database,
        storage,
        _dir: dir,
    }
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn channel_payload(url: &str) -> Value {
    json!({
        "url": url,
        "title": "Acme Cast",
        "window_size": 3,
        "feed_type": "audio"
    })
}

#[tokio::test]
async fn health_reports_version_and_timestamp() {
    let test = test_app().await;
    let (status, body) = send_request(&test.app, Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body.get("timestamp").is_some());
}

#[tokio::test]
async fn channel_crud_lifecycle() {
    let test = test_app().await;

    let (status, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@acme")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["feed_type"], "audio");
    assert_eq!(created["window_size"], 3);

    let (status, fetched) =
        send_request(&test.app, Method::GET, &format!("/api/v1/channels/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);

    let (status, updated) = send_request(
        &test.app,
        Method::PUT,
        &format!("/api/v1/channels/{id}"),
        Some(json!({"title": "Renamed", "enabled": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Renamed");
    assert_eq!(updated["enabled"], false);

    let (status, listed) = send_request(&test.app, Method::GET, "/api/v1/channels", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total_count"], 1);

    let (status, _) = send_request(
        &test.app,
        Method::DELETE,
        &format!("/api/v1/channels/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
        send_request(&test.app, Method::GET, &format!("/api/v1/channels/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_channel_url_conflicts() {
    let test = test_app().await;
    let payload = channel_payload("https://videos.example.org/@dup");

    let (status, _) =
        send_request(&test.app, Method::POST, "/api/v1/channels", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        send_request(&test.app, Method::POST, "/api/v1/channels", Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert!(body["error"]["request_id"].is_string());
}

#[tokio::test]
async fn invalid_channel_url_is_a_validation_error() {
    let test = test_app().await;

    let (status, body) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("not a url")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["field"], "url");

    let (status, body) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("ftp://videos.example.org/@x")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn out_of_range_window_size_is_rejected() {
    let test = test_app().await;
    let mut payload = channel_payload("https://videos.example.org/@w");
    payload["window_size"] = json!(5000);

    let (status, body) =
        send_request(&test.app, Method::POST, "/api/v1/channels", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "window_size");
}

#[tokio::test]
async fn unknown_channel_is_not_found_with_envelope() {
    let test = test_app().await;
    let id = Uuid::new_v4();

    let (status, body) =
        send_request(&test.app, Method::GET, &format!("/api/v1/channels/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["error"]["request_id"].is_string());
}

#[tokio::test]
async fn refresh_endpoint_discovers_stub_videos() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@r")),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send_request(
        &test.app,
        Method::POST,
        &format!("/api/v1/channels/{id}/refresh"),
        Some(json!({"force": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "refreshed");
    assert_eq!(body["videos_seen"], 2);
    assert_eq!(body["episodes_created"], 2);
    assert_eq!(body["episodes_queued"], 2);

    let (status, episodes) = send_request(
        &test.app,
        Method::GET,
        &format!("/api/v1/channels/{id}/episodes?status=pending"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(episodes.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn episode_delete_conflicts_while_downloading() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@dl")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let episode = test
        .database
        .create_episode(&NewEpisode {
            channel_id,
            video_id: "busy".to_string(),
            title: "Busy".to_string(),
            description: None,
            thumbnail_url: None,
            duration_seconds: None,
            published_at: None,
        })
        .await
        .unwrap();
    test.database.enqueue_episode(episode.id, 5).await.unwrap();
    test.database.claim_next().await.unwrap().unwrap();

    let (status, body) = send_request(
        &test.app,
        Method::DELETE,
        &format!("/api/v1/episodes/{}", episode.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = send_request(
        &test.app,
        Method::DELETE,
        &format!("/api/v1/episodes/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_is_only_allowed_from_failed() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@retry")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let episode = test
        .database
        .create_episode(&NewEpisode {
            channel_id,
            video_id: "flaky".to_string(),
            title: "Flaky".to_string(),
            description: None,
            thumbnail_url: None,
            duration_seconds: None,
            published_at: None,
        })
        .await
        .unwrap();

    // Pending → retry conflicts
    let (status, _) = send_request(
        &test.app,
        Method::POST,
        &format!("/api/v1/episodes/{}/retry", episode.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    test.database
        .enqueue_episode(episode.id, 5)
        .await
        .unwrap();
    let entry = test.database.claim_next().await.unwrap().unwrap();
    test.database
        .mark_queue_failed(entry.id, "boom")
        .await
        .unwrap();
    test.database
        .mark_episode_failed(episode.id, channel_id, "boom", 1)
        .await
        .unwrap();

    let (status, body) = send_request(
        &test.app,
        Method::POST,
        &format!("/api/v1/episodes/{}/retry", episode.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["retry_count"], 0);
    assert!(body["error_message"].is_null());
}

#[tokio::test]
async fn status_aggregates_counts() {
    let test = test_app().await;

    send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@s")),
    )
    .await;

    let (status, body) = send_request(&test.app, Method::GET, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channels_enabled"], 1);
    assert_eq!(body["channels_disabled"], 0);
    assert!(body["episodes_by_status"].is_array());
    assert!(body["queue_by_status"].is_array());
    assert!(body["storage_bytes"].is_u64());
}

#[tokio::test]
async fn queue_endpoint_lists_failures_with_attempts() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@q")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let episode = test
        .database
        .create_episode(&NewEpisode {
            channel_id,
            video_id: "broken".to_string(),
            title: "Broken".to_string(),
            description: None,
            thumbnail_url: None,
            duration_seconds: None,
            published_at: None,
        })
        .await
        .unwrap();
    test.database.enqueue_episode(episode.id, 5).await.unwrap();
    let entry = test.database.claim_next().await.unwrap().unwrap();
    test.database
        .mark_queue_failed(entry.id, "tool exploded")
        .await
        .unwrap();
    test.database
        .mark_episode_failed(episode.id, channel_id, "tool exploded", 1)
        .await
        .unwrap();

    let (status, body) = send_request(&test.app, Method::GET, "/api/v1/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let failed = body["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["last_error"], "tool exploded");
    assert_eq!(failed[0]["attempts"], 1);
    assert_eq!(failed[0]["max_attempts"], 3);
}

// Feeds

async fn seed_completed_episode(test: &TestApp, channel_id: Uuid, video_id: &str) {
    let episode = test
        .database
        .create_episode(&NewEpisode {
            channel_id,
            video_id: video_id.to_string(),
            title: format!("Episode {video_id}"),
            description: None,
            thumbnail_url: None,
            duration_seconds: Some(90),
            published_at: Some(Utc::now() - Duration::days(1)),
        })
        .await
        .unwrap();

    let slug = "acme-cast";
    let dir = test.storage.variant_dir(slug, MediaKind::Audio);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let filename = format!("{video_id}.mp3");
    tokio::fs::write(dir.join(&filename), b"mp3-bytes").await.unwrap();

    test.database
        .mark_episode_completed(
            episode.id,
            channel_id,
            Some(&MediaStorage::relative_path(slug, MediaKind::Audio, &filename)),
            Some(9),
            None,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn audio_feed_serves_rss_with_caching_headers() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@feed")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    seed_completed_episode(&test, channel_id, "f1").await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/feed/{channel_id}/audio.rss"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let etag = response
        .headers()
        .get(header::ETAG)
        .expect("etag present")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=300"
    );
    assert!(response.headers().get(header::LAST_MODIFIED).is_some());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("<rss version=\"2.0\""));
    assert!(xml.contains("tubefeed:f1"));
    assert!(xml.contains("type=\"audio/mpeg\""));

    // Conditional request answers 304 from the cache
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/feed/{channel_id}/audio.rss"))
                .header(header::IF_NONE_MATCH, &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    // Identical state renders the identical document (same strong ETag)
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/feed/{channel_id}/audio.rss"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::ETAG).unwrap().to_str().unwrap(),
        etag
    );
}

#[tokio::test]
async fn atom_and_combined_feeds_render() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@atom")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    seed_completed_episode(&test, channel_id, "a1").await;

    let (status, _) = send_request(
        &test.app,
        Method::GET,
        &format!("/feed/{channel_id}/atom.xml"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/feeds/all.rss")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("tubefeed:a1"));
}

#[tokio::test]
async fn feed_for_unknown_channel_is_not_found() {
    let test = test_app().await;
    let (status, _) = send_request(
        &test.app,
        Method::GET,
        &format!("/feed/{}/audio.rss", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn media_files_are_served_and_traversal_is_blocked() {
    let test = test_app().await;

    let (_, created) = send_request(
        &test.app,
        Method::POST,
        "/api/v1/channels",
        Some(channel_payload("https://videos.example.org/@media")),
    )
    .await;
    let channel_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    seed_completed_episode(&test, channel_id, "m1").await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/feeds/acme-cast/audio/m1.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"mp3-bytes");

    let (status, _) = send_request(
        &test.app,
        Method::GET,
        "/feeds/acme-cast/audio/%2E%2E%2F%2E%2E%2Fsecret",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_request(
        &test.app,
        Method::GET,
        "/feeds/acme-cast/thumbnails/m1.mp3",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trigger_rate_limit_applies_headers_and_429() {
    let test = test_app().await;

    let mut last_remaining = None;
    for _ in 0..10 {
        let response = test
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/refresh-all")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        last_remaining = response
            .headers()
            .get("X-RateLimit-Remaining")
            .map(|v| v.to_str().unwrap().to_string());
    }
    assert_eq!(last_remaining.as_deref(), Some("0"));

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/refresh-all")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("X-RateLimit-Limit").unwrap(),
        "10"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn responses_carry_request_ids() {
    let test = test_app().await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().get("x-request-id").is_some());
}
