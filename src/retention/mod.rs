//! Rolling-window retention.
//!
//! For each channel, completed episodes beyond `window_size` (newest
//! published first) are evicted: media files deleted, path and size columns
//! nulled, status set to `deleted`. The sweep only ever touches `completed`
//! episodes, which only workers produce, so it is safe to run concurrently
//! with the pipeline and is idempotent.

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::database::Database;
use crate::models::{Channel, Episode};
use crate::storage::MediaStorage;

#[derive(Clone)]
pub struct RetentionService {
    database: Database,
    storage: MediaStorage,
    config: Config,
}

impl RetentionService {
    pub fn new(database: Database, storage: MediaStorage, config: Config) -> Self {
        Self {
            database,
            storage,
            config,
        }
    }

    /// Periodic sweep loop. Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let sweep_interval = Duration::from_secs(self.config.retention.sweep_interval);
        info!(
            "Starting retention sweep (every {}s)",
            self.config.retention.sweep_interval
        );

        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(evicted) => info!("Retention evicted {} episodes", evicted),
                        Err(e) => error!("Retention sweep failed: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Retention sweep shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over every channel. Returns the number of evicted episodes.
    pub async fn sweep(&self) -> Result<u64> {
        let channels = self.database.list_all_channels().await?;
        let mut evicted = 0u64;

        for channel in channels {
            match self.sweep_channel(&channel).await {
                Ok(count) => evicted += count,
                Err(e) => {
                    error!("Retention failed for channel '{}': {}", channel.title, e);
                }
            }
        }

        Ok(evicted)
    }

    async fn sweep_channel(&self, channel: &Channel) -> Result<u64> {
        let window = self.effective_window(channel);
        let candidates = self
            .database
            .list_evictable_episodes(channel.id, window)
            .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        debug!(
            "Evicting {} episodes beyond window {} for '{}'",
            candidates.len(),
            window,
            channel.title
        );

        for episode in &candidates {
            self.evict_episode(episode).await?;
        }

        Ok(candidates.len() as u64)
    }

    /// Delete an episode's media files and tombstone the row.
    async fn evict_episode(&self, episode: &Episode) -> Result<()> {
        self.remove_episode_files(episode).await?;
        self.database
            .mark_episode_deleted(episode.id, episode.channel_id)
            .await?;
        debug!("Evicted episode '{}' ({})", episode.title, episode.video_id);
        Ok(())
    }

    /// Remove whatever media files an episode owns. Shared by eviction, the
    /// episode delete endpoint and channel deletion.
    pub async fn remove_episode_files(&self, episode: &Episode) -> Result<()> {
        if let Some(path) = &episode.file_path_audio {
            self.storage.remove_media(path).await?;
        }
        if let Some(path) = &episode.file_path_video {
            self.storage.remove_media(path).await?;
        }
        Ok(())
    }

    /// Channel deletion support: remove every file the channel's episodes
    /// reference before the cascading row delete.
    pub async fn purge_channel_files(&self, channel: &Channel) -> Result<()> {
        let episodes = self
            .database
            .list_channel_episodes(channel.id, None, 0)
            .await?;

        for episode in &episodes {
            self.remove_episode_files(episode).await?;
        }

        info!(
            "Removed media files for {} episodes of '{}'",
            episodes.len(),
            channel.title
        );
        Ok(())
    }

    fn effective_window(&self, channel: &Channel) -> i64 {
        self.config
            .overrides_for(&channel.id.to_string())
            .and_then(|o| o.window_size)
            .unwrap_or(channel.window_size)
    }
}
