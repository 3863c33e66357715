//! Stuck-entry recovery.
//!
//! Two layers: a startup pass returns every `in_progress` row left behind by
//! a previous process to `pending`, and a periodic sweep catches entries
//! whose heartbeat (`updated_at`, refreshed by workers between long steps)
//! has gone silent for longer than the configured threshold. Neither path
//! consumes a retry attempt.

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::config::WorkersConfig;
use crate::database::Database;

pub struct Reaper {
    database: Database,
    config: WorkersConfig,
}

impl Reaper {
    pub fn new(database: Database, config: WorkersConfig) -> Self {
        Self { database, config }
    }

    /// Clean-restart recovery, run once before workers start.
    pub async fn recover_on_startup(&self) -> anyhow::Result<()> {
        let reverted = self.database.revert_all_in_progress().await?;
        if reverted > 0 {
            info!(
                "Startup recovery returned {} in-progress entries to pending",
                reverted
            );
        }
        Ok(())
    }

    /// Periodic sweep. The scan interval is half the stuck threshold so a
    /// dead entry waits at most 1.5 thresholds before recovery.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let threshold = self.config.stuck_threshold;
        let mut ticker = interval(Duration::from_secs((threshold / 2).max(60)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick; startup recovery already ran.
        ticker.tick().await;

        info!("Starting stuck-entry reaper (threshold {}s)", threshold);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - ChronoDuration::seconds(threshold as i64);
                    match self.database.revert_in_progress_since(cutoff).await {
                        Ok(0) => {}
                        Ok(reverted) => {
                            warn!("Reaper reverted {} stuck queue entries", reverted);
                        }
                        Err(e) => {
                            error!("Reaper sweep failed: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Reaper shutting down");
                    break;
                }
            }
        }
    }
}
