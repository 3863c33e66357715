//! Web layer.
//!
//! HTTP interface for the mirrored library: the management API under
//! `/api/v1`, feed documents under `/feed` and `/feeds`, and the media files
//! their enclosures point at. Handlers stay thin and delegate to the store
//! and pipeline services.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config, database::Database, feeds::cache::FeedCache, feeds::FeedGenerator,
    refresh::RefreshService, retention::RetentionService, storage::MediaStorage,
};

pub mod api;
pub mod extractors;
pub mod feeds;
pub mod middleware;
pub mod rate_limit;
pub mod responses;

pub use extractors::RequestContext;
pub use rate_limit::RateLimiter;
pub use responses::{ApiError, ErrorCode};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Config,
    pub storage: MediaStorage,
    pub refresh: RefreshService,
    pub retention: RetentionService,
    pub feed_cache: FeedCache,
    pub feed_generator: Arc<FeedGenerator>,
    pub rate_limiter: RateLimiter,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!(
            "{}:{}",
            state.config.server.host, state.config.server.port
        )
        .parse()?;
        let app = Self::router(state);

        Ok(Self { app, addr })
    }

    /// The full application router; also the entry point for router-level
    /// tests driven through `tower::ServiceExt`.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .nest("/api/v1", Self::api_v1_routes())
            // Feed documents
            .route("/feed/:channel_id/audio.rss", get(feeds::channel_audio_feed))
            .route("/feed/:channel_id/video.rss", get(feeds::channel_video_feed))
            .route("/feed/:channel_id/atom.xml", get(feeds::channel_atom_feed))
            .route("/feeds/all.rss", get(feeds::combined_audio_feed))
            .route("/feeds/all-video.rss", get(feeds::combined_video_feed))
            // Media enclosures
            .route("/feeds/:slug/:kind/:filename", get(feeds::serve_media))
            // Middleware (applied in reverse order)
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::rate_limit_middleware,
            ))
            .layer(axum::middleware::from_fn(middleware::request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            .route("/health", get(api::health))
            .route("/status", get(api::status))
            .route("/queue", get(api::queue_overview))
            // Channels
            .route(
                "/channels",
                get(api::list_channels).post(api::create_channel),
            )
            .route(
                "/channels/:id",
                get(api::get_channel)
                    .put(api::update_channel)
                    .delete(api::delete_channel),
            )
            .route("/channels/:id/episodes", get(api::list_channel_episodes))
            .route("/channels/:id/refresh", post(api::refresh_channel))
            // Episodes
            .route(
                "/episodes/:id",
                get(api::get_episode).delete(api::delete_episode),
            )
            .route("/episodes/:id/retry", post(api::retry_episode))
            // Global refresh trigger
            .route("/refresh-all", post(api::refresh_all))
    }

    /// Start the web server; runs until the shutdown signal fires.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
