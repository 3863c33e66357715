//! Feed generation.
//!
//! Renders the mirrored library as podcast feeds: an RSS 2.0 dialect with
//! the iTunes podcast namespace and an Atom 1.0 dialect. Rendering is a pure
//! function of (channel state, episode set, base URL); identical inputs
//! produce byte-identical documents, which is what makes the strong ETags in
//! [`cache`] meaningful.

pub mod atom;
pub mod cache;
pub mod rss;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Channel, Episode, EpisodeStatus};
use crate::storage::MediaKind;
use crate::utils::{channel_slug, format_duration, media_type_for, sanitize_base_url};

/// Stable item identifier prefix; the full guid is `tubefeed:<video_id>`.
pub const GUID_PREFIX: &str = "tubefeed:";

/// Cap on items in the combined cross-channel feeds.
pub const COMBINED_FEED_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedVariant {
    Audio,
    Video,
    Atom,
}

/// One renderable feed item: an episode plus its resolved enclosure.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub guid: String,
    pub enclosure_url: String,
    pub enclosure_length: i64,
    pub enclosure_type: &'static str,
    pub duration: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

/// Channel-level metadata shared by both dialects.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

pub struct FeedGenerator {
    base_url: String,
}

impl FeedGenerator {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: sanitize_base_url(base_url),
        }
    }

    /// Render a single channel's feed in the requested variant.
    pub fn channel_feed(
        &self,
        channel: &Channel,
        episodes: &[Episode],
        variant: FeedVariant,
    ) -> Result<Vec<u8>> {
        let kind = match variant {
            FeedVariant::Audio => MediaKind::Audio,
            FeedVariant::Video => MediaKind::Video,
            // The Atom variant follows the channel's configured preference;
            // `both` channels get their audio enclosures.
            FeedVariant::Atom => {
                if channel.feed_type.wants_audio() {
                    MediaKind::Audio
                } else {
                    MediaKind::Video
                }
            }
        };

        let items = self.collect_items(channel, episodes, kind, channel.window_size as usize);
        let meta = feed_meta(channel);

        match variant {
            FeedVariant::Audio | FeedVariant::Video => rss::render(&meta, &items),
            FeedVariant::Atom => atom::render(&channel.id.to_string(), &meta, &items),
        }
    }

    /// Render the combined cross-channel feed for enabled channels, capped
    /// at [`COMBINED_FEED_CAP`] items overall.
    pub fn combined_feed(
        &self,
        channels: &[(Channel, Vec<Episode>)],
        kind: MediaKind,
    ) -> Result<Vec<u8>> {
        let mut items = Vec::new();
        for (channel, episodes) in channels {
            if !channel.enabled {
                continue;
            }
            items.extend(self.collect_items(
                channel,
                episodes,
                kind,
                channel.window_size as usize,
            ));
        }

        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items.truncate(COMBINED_FEED_CAP);

        let meta = FeedMeta {
            title: match kind {
                MediaKind::Audio => "All Channels".to_string(),
                MediaKind::Video => "All Channels (Video)".to_string(),
            },
            link: self.base_url.clone(),
            description: Some("Combined feed of all mirrored channels".to_string()),
            image_url: None,
        };

        rss::render(&meta, &items)
    }

    /// Episodes eligible for a feed: completed, downloaded, with the
    /// variant's file present. Input is expected newest-published first, as
    /// the store lists it; the per-channel window cap is re-applied here so
    /// rendering stays correct even between retention sweeps.
    fn collect_items(
        &self,
        channel: &Channel,
        episodes: &[Episode],
        kind: MediaKind,
        window: usize,
    ) -> Vec<FeedItem> {
        let slug = channel_slug(&channel.title);

        episodes
            .iter()
            .filter(|e| e.status == EpisodeStatus::Completed && e.downloaded_at.is_some())
            .filter_map(|e| {
                let (path, length) = match kind {
                    MediaKind::Audio => (e.file_path_audio.as_deref(), e.file_size_audio),
                    MediaKind::Video => (e.file_path_video.as_deref(), e.file_size_video),
                };
                let path = path?;
                let length = length?;
                let filename = path.rsplit('/').next()?;

                Some(FeedItem {
                    title: e.title.clone(),
                    description: e.description.clone(),
                    thumbnail_url: e.thumbnail_url.clone(),
                    guid: format!("{GUID_PREFIX}{}", e.video_id),
                    enclosure_url: self.enclosure_url(&slug, kind, filename),
                    enclosure_length: length,
                    enclosure_type: media_type_for(filename),
                    duration: e.duration_seconds.map(format_duration),
                    published_at: e.published_at,
                    downloaded_at: e.downloaded_at,
                })
            })
            .take(window)
            .collect()
    }

    fn enclosure_url(&self, slug: &str, kind: MediaKind, filename: &str) -> String {
        format!(
            "{}/feeds/{}/{}/{}",
            self.base_url,
            urlencoding::encode(slug),
            kind.as_str(),
            urlencoding::encode(filename),
        )
    }
}

fn feed_meta(channel: &Channel) -> FeedMeta {
    FeedMeta {
        title: channel.title.clone(),
        link: channel.url.clone(),
        description: channel.description.clone(),
        image_url: channel.thumbnail_url.clone(),
    }
}
