//! Channel refresh scheduling.
//!
//! Two triggers feed the same per-channel procedure: a periodic sweep over
//! all enabled channels (stalest first) and on-demand requests from the
//! management API. Refreshes for distinct channels may run in parallel;
//! concurrent refreshes of the same channel are coalesced through an
//! in-flight set, so the window truncation and queueing steps never race.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::Database;
use crate::errors::StoreError;
use crate::extractor::VideoExtractor;
use crate::models::*;

/// What caused a refresh. On-demand refreshes respect a short recency guard
/// unless forced; the scheduler's own cadence is the guard for periodic runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Scheduler,
    Manual { force: bool },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefreshResult {
    Refreshed(RefreshOutcome),
    /// Another refresh of the same channel was already running.
    Coalesced { channel_id: Uuid },
    /// Non-forced request within the recency guard window.
    Skipped { channel_id: Uuid },
}

#[derive(Clone)]
pub struct RefreshService {
    database: Database,
    extractor: Arc<dyn VideoExtractor>,
    config: Config,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl RefreshService {
    pub fn new(database: Database, extractor: Arc<dyn VideoExtractor>, config: Config) -> Self {
        Self {
            database,
            extractor,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Periodic sweep loop. Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let poll_interval = Duration::from_secs(self.config.refresh.poll_interval);
        info!(
            "Starting refresh scheduler (sweep every {}s)",
            self.config.refresh.poll_interval
        );

        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; let it, so a fresh deployment
        // populates its library without waiting a full interval.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Refresh sweep failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Refresh scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over every enabled channel, stalest first. A failing channel
    /// is logged and skipped, never aborting the sweep.
    async fn sweep(&self) -> Result<()> {
        let channels = self.database.list_channels_for_refresh().await?;
        debug!("Refresh sweep over {} enabled channels", channels.len());

        for channel in channels {
            match self.refresh_channel(&channel, RefreshTrigger::Scheduler).await {
                Ok(RefreshResult::Refreshed(outcome)) => {
                    info!(
                        "Refreshed '{}': {} seen, {} new, {} queued",
                        channel.title,
                        outcome.videos_seen,
                        outcome.episodes_created,
                        outcome.episodes_queued
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Refresh failed for channel '{}': {}", channel.title, e);
                }
            }
        }

        Ok(())
    }

    /// On-demand refresh of every enabled channel.
    pub async fn refresh_all(&self, force: bool) -> Result<Vec<RefreshResult>> {
        let channels = self.database.list_channels_for_refresh().await?;
        let mut results = Vec::with_capacity(channels.len());

        for channel in channels {
            match self
                .refresh_channel(&channel, RefreshTrigger::Manual { force })
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Refresh failed for channel '{}': {}", channel.title, e);
                }
            }
        }

        Ok(results)
    }

    /// The per-channel refresh procedure. Idempotent: re-running against an
    /// unchanged upstream creates nothing new.
    pub async fn refresh_channel(
        &self,
        channel: &Channel,
        trigger: RefreshTrigger,
    ) -> Result<RefreshResult> {
        let channel = self.effective_channel(channel);

        if !channel.enabled {
            return Ok(RefreshResult::Skipped {
                channel_id: channel.id,
            });
        }

        if let RefreshTrigger::Manual { force: false } = trigger {
            if let Some(last) = channel.last_refresh_at {
                let age = Utc::now().signed_duration_since(last).num_seconds();
                if age >= 0 && (age as u64) < self.config.refresh.recency_guard {
                    debug!(
                        "Skipping refresh of '{}': refreshed {}s ago",
                        channel.title, age
                    );
                    return Ok(RefreshResult::Skipped {
                        channel_id: channel.id,
                    });
                }
            }
        }

        // Coalesce concurrent refreshes of the same channel
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(channel.id) {
                debug!("Refresh of '{}' already in flight, coalescing", channel.title);
                return Ok(RefreshResult::Coalesced {
                    channel_id: channel.id,
                });
            }
        }

        let result = self.refresh_inner(&channel).await;

        self.in_flight.lock().await.remove(&channel.id);

        result.map(RefreshResult::Refreshed)
    }

    async fn refresh_inner(&self, channel: &Channel) -> Result<RefreshOutcome> {
        info!("Refreshing channel '{}' ({})", channel.title, channel.id);

        let listings = self
            .extractor
            .list_channel_videos(&channel.url, channel.window_size as usize)
            .await?;

        // Upstream order is newest-first; the listing itself is already
        // bounded, but truncate defensively in case the tool over-returns.
        let listings: Vec<VideoListing> = listings
            .into_iter()
            .take(channel.window_size as usize)
            .collect();

        let videos_seen = listings.len();
        let mut episodes_created = 0usize;
        let mut episodes_queued = 0usize;

        for listing in &listings {
            // Fast path: the unique video_id already exists, nothing to do.
            if self
                .database
                .get_episode_by_video_id(&listing.video_id)
                .await?
                .is_some()
            {
                continue;
            }

            let metadata = match self.extractor.fetch_video_metadata(&listing.video_id).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    // Fall back to listing data; the worker re-fetches nothing,
                    // so a thin episode is better than a lost one.
                    warn!(
                        "Metadata fetch failed for {} ({}), using listing fields",
                        listing.video_id, e
                    );
                    VideoMetadata {
                        title: listing.title.clone(),
                        published_at: listing.published_at,
                        ..Default::default()
                    }
                }
            };

            let new_episode = NewEpisode {
                channel_id: channel.id,
                video_id: listing.video_id.clone(),
                title: metadata.title,
                description: metadata.description,
                thumbnail_url: metadata.thumbnail_url,
                duration_seconds: metadata.duration_seconds,
                published_at: metadata.published_at.or(listing.published_at),
            };

            let episode = match self.database.create_episode(&new_episode).await {
                Ok(episode) => episode,
                // Lost a race with a concurrent discovery of the same video
                Err(StoreError::Duplicate { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            episodes_created += 1;

            match self
                .database
                .enqueue_episode(episode.id, DEFAULT_PRIORITY)
                .await
            {
                Ok(_) => episodes_queued += 1,
                Err(StoreError::Duplicate { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let completed_at = Utc::now();
        self.database
            .touch_channel_refreshed(channel.id, completed_at)
            .await?;

        Ok(RefreshOutcome {
            channel_id: channel.id,
            videos_seen,
            episodes_created,
            episodes_queued,
            completed_at,
        })
    }

    /// Channel with any config-file overrides folded in.
    fn effective_channel(&self, channel: &Channel) -> Channel {
        let mut channel = channel.clone();
        if let Some(overrides) = self.config.overrides_for(&channel.id.to_string()) {
            if let Some(window_size) = overrides.window_size {
                channel.window_size = window_size;
            }
            if let Some(enabled) = overrides.enabled {
                channel.enabled = enabled;
            }
            if let Some(feed_type) = overrides.feed_type {
                channel.feed_type = feed_type;
            }
        }
        channel
    }
}
