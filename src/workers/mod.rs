//! Download/transcode worker pool.
//!
//! `max_concurrent_downloads` workers share a semaphore gate and compete for
//! queue entries through the store's atomic claim. Each claim drives one
//! episode through the download → transcode state machine and applies the
//! retry policy on failure. Shutdown lets the current step finish or aborts
//! it, releasing the claim without consuming an attempt.

pub mod reaper;
pub mod retry;

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TranscodeConfig};
use crate::database::Database;
use crate::errors::ToolError;
use crate::extractor::VideoExtractor;
use crate::models::*;
use crate::storage::{MediaKind, MediaStorage};
use crate::transcoder::{AudioEncodeOptions, MediaTranscoder, VideoEncodeOptions};
use crate::utils::channel_slug;
use retry::backoff_delay;

#[derive(Clone)]
pub struct WorkerPool {
    database: Database,
    storage: MediaStorage,
    extractor: Arc<dyn VideoExtractor>,
    transcoder: Arc<dyn MediaTranscoder>,
    config: Config,
    gate: Arc<Semaphore>,
}

/// What one claimed entry turned into.
enum StepOutcome {
    Completed,
    Retried,
    FailedTerminally,
}

/// A classified tool failure feeds the retry policy; an internal fault
/// (store, filesystem) releases the claim without consuming an attempt.
enum ProcessError {
    Tool(ToolError),
    Internal(anyhow::Error),
}

impl From<ToolError> for ProcessError {
    fn from(e: ToolError) -> Self {
        ProcessError::Tool(e)
    }
}

fn internal<E: Into<anyhow::Error>>(e: E) -> ProcessError {
    ProcessError::Internal(e.into())
}

impl WorkerPool {
    pub fn new(
        database: Database,
        storage: MediaStorage,
        extractor: Arc<dyn VideoExtractor>,
        transcoder: Arc<dyn MediaTranscoder>,
        config: Config,
    ) -> Self {
        let permits = config.workers.max_concurrent_downloads;
        Self {
            database,
            storage,
            extractor,
            transcoder,
            config,
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Spawn the worker tasks. Each runs until the shutdown signal fires.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        let count = self.config.workers.max_concurrent_downloads;
        info!("Starting {} download workers", count);

        (0..count)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id, shutdown_rx).await;
                })
            })
            .collect()
    }

    /// Claim and process at most one queue entry. Returns whether an entry
    /// was claimed. This is the single worker step; the loop adds the
    /// concurrency gate, idle polling and shutdown handling around it.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(entry) = self.database.claim_next().await? else {
            return Ok(false);
        };

        if let Err(e) = self.process_entry(&entry).await {
            error!("Internal error on episode ({}): {}", entry.episode_id, e);
            self.database.release_claim(entry.id, entry.episode_id).await?;
        }

        Ok(true)
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        let poll_interval = Duration::from_secs(self.config.workers.queue_poll_interval);
        debug!("Worker {} started", worker_id);

        loop {
            // Acquire a slot; leave immediately if shutdown wins the race.
            let permit = tokio::select! {
                permit = self.gate.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
                _ = shutdown.recv() => break,
            };

            let entry = match self.database.claim_next().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
                Err(e) => {
                    error!("Worker {} failed to claim: {}", worker_id, e);
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };

            // Abandoning the pipeline future on shutdown kills any running
            // child process; the claim goes back untouched.
            tokio::select! {
                result = self.process_entry(&entry) => {
                    if let Err(e) = result {
                        error!(
                            "Worker {} internal error on episode ({}): {}",
                            worker_id, entry.episode_id, e
                        );
                        if let Err(re) = self.database.release_claim(entry.id, entry.episode_id).await {
                            error!("Failed to release claim ({}): {}", entry.id, re);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(
                        "Worker {} interrupted by shutdown, releasing episode ({})",
                        worker_id, entry.episode_id
                    );
                    if let Err(e) = self.database.release_claim(entry.id, entry.episode_id).await {
                        error!("Failed to release claim ({}): {}", entry.id, e);
                    }
                    drop(permit);
                    break;
                }
            }

            drop(permit);
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Drive one claimed entry through download and transcode. Returns Err
    /// only for internal faults, which the loop answers by releasing the
    /// claim; classified tool failures are consumed by the retry policy here.
    async fn process_entry(&self, entry: &QueueEntry) -> Result<()> {
        let Some(episode) = self.database.get_episode(entry.episode_id).await? else {
            warn!("Claimed queue entry ({}) has no episode, cancelling", entry.id);
            self.database.cancel_queue_entry(entry.id).await?;
            return Ok(());
        };
        let Some(channel) = self.database.get_channel(episode.channel_id).await? else {
            warn!("Episode ({}) has no channel, cancelling", episode.id);
            self.database.cancel_queue_entry(entry.id).await?;
            return Ok(());
        };

        info!(
            "Processing episode '{}' ({}) attempt {}/{}",
            episode.title, episode.video_id, entry.attempts, entry.max_attempts
        );

        let outcome = match self.download_and_transcode(entry, &episode, &channel).await {
            Ok(()) => {
                self.database.mark_queue_completed(entry.id).await?;
                StepOutcome::Completed
            }
            Err(ProcessError::Tool(tool_error)) => {
                self.apply_retry_policy(entry, &episode, &tool_error).await?
            }
            Err(ProcessError::Internal(e)) => return Err(e),
        };

        match outcome {
            StepOutcome::Completed => {
                info!("Episode '{}' completed", episode.video_id);
            }
            StepOutcome::Retried => {
                info!("Episode '{}' scheduled for retry", episode.video_id);
            }
            StepOutcome::FailedTerminally => {
                warn!("Episode '{}' terminally failed", episode.video_id);
            }
        }

        Ok(())
    }

    async fn download_and_transcode(
        &self,
        entry: &QueueEntry,
        episode: &Episode,
        channel: &Channel,
    ) -> std::result::Result<(), ProcessError> {
        let temp_dir = self.storage.temp_dir();

        // Step 1: pull the source into temp while the episode sits in
        // `downloading`.
        let source = self
            .extractor
            .download_video(&episode.video_id, &temp_dir)
            .await?;

        self.database
            .mark_episode_processing(episode.id)
            .await
            .map_err(internal)?;
        self.database
            .touch_queue_entry(entry.id)
            .await
            .map_err(internal)?;

        // Step 2: transcode per the channel's feed type.
        let transcode = self.transcode_settings(channel);
        let slug = channel_slug(&channel.title);

        let mut audio: Option<(String, i64)> = None;
        let mut video: Option<(String, i64)> = None;

        let result = async {
            if channel.feed_type.wants_audio() {
                audio =
                    Some(self.encode_audio(&slug, &episode.video_id, &source, &transcode).await?);
                self.database
                    .touch_queue_entry(entry.id)
                    .await
                    .map_err(internal)?;
            }
            if channel.feed_type.wants_video() {
                video =
                    Some(self.encode_video(&slug, &episode.video_id, &source, &transcode).await?);
            }
            Ok::<(), ProcessError>(())
        }
        .await;

        if let Err(e) = result {
            let _ = self.storage.remove_temp(&source).await;
            return Err(e);
        }

        self.database
            .mark_episode_completed(
                episode.id,
                episode.channel_id,
                audio.as_ref().map(|(p, _)| p.as_str()),
                audio.as_ref().map(|(_, s)| *s),
                video.as_ref().map(|(p, _)| p.as_str()),
                video.as_ref().map(|(_, s)| *s),
            )
            .await
            .map_err(internal)?;

        if !transcode.keep_original {
            if let Err(e) = self.storage.remove_temp(&source).await {
                warn!("Failed to remove temp source {}: {}", source.display(), e);
            }
        }

        Ok(())
    }

    async fn encode_audio(
        &self,
        slug: &str,
        video_id: &str,
        source: &Path,
        transcode: &TranscodeConfig,
    ) -> std::result::Result<(String, i64), ProcessError> {
        let dir = self.storage.variant_dir(slug, MediaKind::Audio);
        tokio::fs::create_dir_all(&dir).await.map_err(internal)?;

        let filename = format!("{video_id}.{}", transcode.audio_format.extension());
        let output = self
            .transcoder
            .to_audio(source, &dir.join(&filename), &AudioEncodeOptions::from(transcode))
            .await?;

        Ok((
            MediaStorage::relative_path(slug, MediaKind::Audio, &filename),
            output.bytes,
        ))
    }

    async fn encode_video(
        &self,
        slug: &str,
        video_id: &str,
        source: &Path,
        transcode: &TranscodeConfig,
    ) -> std::result::Result<(String, i64), ProcessError> {
        let dir = self.storage.variant_dir(slug, MediaKind::Video);
        tokio::fs::create_dir_all(&dir).await.map_err(internal)?;

        let filename = format!("{video_id}.mp4");
        let output = self
            .transcoder
            .to_video(source, &dir.join(&filename), &VideoEncodeOptions::from(transcode))
            .await?;

        Ok((
            MediaStorage::relative_path(slug, MediaKind::Video, &filename),
            output.bytes,
        ))
    }

    /// Decide retry vs terminal failure for a classified tool error, keeping
    /// the episode and queue entry in lockstep.
    async fn apply_retry_policy(
        &self,
        entry: &QueueEntry,
        episode: &Episode,
        tool_error: &ToolError,
    ) -> Result<StepOutcome> {
        let message = tool_error.to_string();

        let retryable = tool_error.class.is_retryable() && entry.attempts < entry.max_attempts;
        if retryable {
            let next_retry_at = Utc::now() + backoff_delay(entry.attempts + 1);
            self.database
                .schedule_queue_retry(entry.id, &message, next_retry_at)
                .await?;
            self.database
                .revert_episode_pending(episode.id, entry.attempts)
                .await?;
            Ok(StepOutcome::Retried)
        } else {
            self.database.mark_queue_failed(entry.id, &message).await?;
            self.database
                .mark_episode_failed(episode.id, episode.channel_id, &message, entry.attempts)
                .await?;
            Ok(StepOutcome::FailedTerminally)
        }
    }

    fn transcode_settings(&self, channel: &Channel) -> TranscodeConfig {
        let overrides = self
            .config
            .overrides_for(&channel.id.to_string())
            .and_then(|o| o.transcode.as_ref());
        self.config.transcode.with_overrides(overrides)
    }
}
