use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubefeed::{
    config::Config,
    database::Database,
    extractor::YtDlpExtractor,
    feeds::{cache::create_cache_invalidation_channel, cache::FeedCache, FeedGenerator},
    refresh::RefreshService,
    retention::RetentionService,
    storage::MediaStorage,
    transcoder::FfmpegTranscoder,
    web::{AppState, RateLimiter, WebServer},
    workers::{reaper::Reaper, WorkerPool},
};

#[derive(Parser)]
#[command(name = "tubefeed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mirrors video channels into a local podcast library served as RSS/Atom feeds")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("tubefeed={},tower_http=warn", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tubefeed v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    let storage = MediaStorage::new(config.storage.media_root.clone());
    storage.ensure_layout()?;
    info!("Media library at {}", storage.root().display());

    // Feed cache invalidation: the store signals after each committed write,
    // the cache task drains.
    let (invalidation_tx, invalidation_rx) = create_cache_invalidation_channel();
    let feed_cache = FeedCache::new();
    feed_cache.clone().spawn_invalidation_task(invalidation_rx);

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database, invalidation_tx).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let extractor = Arc::new(YtDlpExtractor::new());
    let transcoder = Arc::new(FfmpegTranscoder::new());

    let refresh = RefreshService::new(database.clone(), extractor.clone(), config.clone());
    let retention = RetentionService::new(database.clone(), storage.clone(), config.clone());
    let worker_pool = WorkerPool::new(
        database.clone(),
        storage.clone(),
        extractor,
        transcoder,
        config.clone(),
    );
    let reaper = Reaper::new(database.clone(), config.workers.clone());

    // Entries stranded in_progress by an unclean stop go back to pending
    // before any worker can claim.
    reaper.recover_on_startup().await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker_handles = worker_pool.spawn(&shutdown_tx);
    tokio::spawn(refresh.clone().run(shutdown_tx.subscribe()));
    tokio::spawn(retention.clone().run(shutdown_tx.subscribe()));
    tokio::spawn(reaper.run(shutdown_tx.subscribe()));

    let state = AppState {
        database,
        config: config.clone(),
        storage,
        refresh,
        retention,
        feed_cache,
        feed_generator: Arc::new(FeedGenerator::new(&config.server.base_url)),
        rate_limiter: RateLimiter::new(),
    };

    let web_server = WebServer::new(state)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    // Ctrl-C flips the broadcast; every long-running task selects on it.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = signal_tx.send(());
    });

    web_server.serve(shutdown_tx.subscribe()).await?;

    // Bounded drain: workers finish their current step or get cut off.
    let drain = std::time::Duration::from_secs(config.workers.drain_deadline);
    info!("Draining workers (up to {}s)", drain.as_secs());
    let joined = tokio::time::timeout(drain, futures::future::join_all(worker_handles)).await;
    if joined.is_err() {
        warn!("Drain deadline exceeded, aborting remaining workers");
    }

    info!("Shutdown complete");
    Ok(())
}
