//! In-memory feed document cache.
//!
//! The generator is a pure function of store state, so each rendered feed is
//! kept with its strong ETag and last-modified timestamp until a store write
//! invalidates it. Invalidation arrives over a broadcast channel signalled by
//! the database layer after the write commits.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::FeedVariant;

pub type CacheInvalidationSender = broadcast::Sender<InvalidationEvent>;
pub type CacheInvalidationReceiver = broadcast::Receiver<InvalidationEvent>;

pub fn create_cache_invalidation_channel() -> (CacheInvalidationSender, CacheInvalidationReceiver) {
    broadcast::channel(256)
}

#[derive(Debug, Clone, Copy)]
pub enum InvalidationEvent {
    Channel(Uuid),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKey {
    Channel(Uuid, FeedVariant),
    CombinedAudio,
    CombinedVideo,
}

#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub body: Arc<Vec<u8>>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct FeedCache {
    entries: Arc<RwLock<HashMap<FeedKey, CachedFeed>>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &FeedKey) -> Option<CachedFeed> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: FeedKey, feed: CachedFeed) {
        self.entries.write().await.insert(key, feed);
    }

    pub async fn invalidate_channel(&self, channel_id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| match key {
            FeedKey::Channel(id, _) => *id != channel_id,
            // Combined feeds include every channel, so any channel write
            // staleness them too
            FeedKey::CombinedAudio | FeedKey::CombinedVideo => false,
        });
        debug!("Invalidated cached feeds for channel ({})", channel_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drain invalidation events for the lifetime of the process.
    pub fn spawn_invalidation_task(self, mut rx: CacheInvalidationReceiver) {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(InvalidationEvent::Channel(id)) => self.invalidate_channel(id).await,
                    Ok(InvalidationEvent::All) => self.clear().await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Feed cache invalidation lagged by {} events, clearing", missed);
                        self.clear().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
