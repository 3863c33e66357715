use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::FeedType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    /// Per-channel overrides keyed by channel id.
    #[serde(default)]
    pub channels: HashMap<String, ChannelOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// External base URL used when building enclosure links.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the media library: `<slug>/{audio,video}/` plus `temp/`.
    pub media_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between periodic sweeps over enabled channels. Minimum 300.
    pub poll_interval: u64,
    /// Seconds an on-demand, non-forced refresh is suppressed after the last one.
    pub recency_guard: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval: 3600,
            recency_guard: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Download worker pool size. Range 1..=10.
    pub max_concurrent_downloads: usize,
    /// Seconds an idle worker sleeps before polling the queue again.
    pub queue_poll_interval: u64,
    /// Seconds an in_progress entry may go without an update before the
    /// reaper reverts it to pending.
    pub stuck_threshold: u64,
    /// Seconds workers get to finish their current step at shutdown.
    pub drain_deadline: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            queue_poll_interval: 5,
            stuck_threshold: 3600,
            drain_deadline: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds between rolling-window eviction sweeps.
    pub sweep_interval: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub audio_format: AudioFormat,
    /// ffmpeg bitrate string, e.g. "128k". Pattern `\d+[kKmM]`.
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub video_codec: String,
    /// CRF value, 0..=51.
    pub video_quality: u8,
    pub threads: u32,
    /// Keep the downloaded source file next to the transcoded outputs.
    pub keep_original: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            audio_format: AudioFormat::Mp3,
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            video_codec: "libx264".to_string(),
            video_quality: 23,
            threads: 0,
            keep_original: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Ogg,
    M4a,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
        }
    }

    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac | AudioFormat::M4a => "aac",
            AudioFormat::Ogg => "libvorbis",
        }
    }
}

/// Optional per-channel overrides applied on top of the global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelOverrides {
    pub window_size: Option<i64>,
    pub enabled: Option<bool>,
    pub feed_type: Option<FeedType>,
    pub transcode: Option<TranscodeOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscodeOverrides {
    pub audio_format: Option<AudioFormat>,
    pub audio_bitrate: Option<String>,
    pub audio_sample_rate: Option<u32>,
    pub video_codec: Option<String>,
    pub video_quality: Option<u8>,
}

impl TranscodeConfig {
    /// Global settings with a channel's overrides folded in.
    pub fn with_overrides(&self, overrides: Option<&TranscodeOverrides>) -> TranscodeConfig {
        let Some(o) = overrides else {
            return self.clone();
        };
        TranscodeConfig {
            audio_format: o.audio_format.unwrap_or(self.audio_format),
            audio_bitrate: o
                .audio_bitrate
                .clone()
                .unwrap_or_else(|| self.audio_bitrate.clone()),
            audio_sample_rate: o.audio_sample_rate.unwrap_or(self.audio_sample_rate),
            video_codec: o
                .video_codec
                .clone()
                .unwrap_or_else(|| self.video_codec.clone()),
            video_quality: o.video_quality.unwrap_or(self.video_quality),
            threads: self.threads,
            keep_original: self.keep_original,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./tubefeed.db".to_string(),
                max_connections: Some(10),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            storage: StorageConfig {
                media_root: PathBuf::from("./data/media"),
            },
            refresh: RefreshConfig::default(),
            workers: WorkersConfig::default(),
            retention: RetentionConfig::default(),
            transcode: TranscodeConfig::default(),
            channels: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        let config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)
                .with_context(|| format!("failed to read {config_file}"))?;
            let substituted = substitute_env(&contents)?;
            toml::from_str(&substituted)
                .with_context(|| format!("failed to parse {config_file}"))?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all(default_config.storage.media_root.join("temp"))?;
            std::fs::write(&config_file, contents)?;
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh.poll_interval < 300 {
            anyhow::bail!(
                "refresh.poll_interval must be at least 300 seconds, got {}",
                self.refresh.poll_interval
            );
        }
        if !(1..=10).contains(&self.workers.max_concurrent_downloads) {
            anyhow::bail!(
                "workers.max_concurrent_downloads must be within 1..=10, got {}",
                self.workers.max_concurrent_downloads
            );
        }
        if self.transcode.video_quality > 51 {
            anyhow::bail!(
                "transcode.video_quality must be a CRF value within 0..=51, got {}",
                self.transcode.video_quality
            );
        }
        validate_bitrate(&self.transcode.audio_bitrate)?;

        for (id, overrides) in &self.channels {
            if let Some(window) = overrides.window_size {
                if !(1..=1000).contains(&window) {
                    anyhow::bail!(
                        "channels.{id}.window_size must be within 1..=1000, got {window}"
                    );
                }
            }
            if let Some(t) = &overrides.transcode {
                if let Some(bitrate) = &t.audio_bitrate {
                    validate_bitrate(bitrate)?;
                }
                if let Some(q) = t.video_quality {
                    if q > 51 {
                        anyhow::bail!(
                            "channels.{id}.transcode.video_quality must be within 0..=51, got {q}"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    pub fn overrides_for(&self, channel_id: &str) -> Option<&ChannelOverrides> {
        self.channels.get(channel_id)
    }
}

fn validate_bitrate(bitrate: &str) -> Result<()> {
    let re = Regex::new(r"^\d+[kKmM]$").expect("static regex");
    if !re.is_match(bitrate) {
        anyhow::bail!("audio_bitrate must match \\d+[kKmM], got '{bitrate}'");
    }
    Ok(())
}

/// Substitute `${VAR}`, `${VAR:-default}` and `${VAR:?message}` from the
/// process environment before the TOML is parsed.
pub fn substitute_env(raw: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([?-])([^}]*))?\}").expect("static regex");

    let mut result = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in re.captures_iter(raw) {
        let whole = caps.get(0).expect("capture 0 always present");
        result.push_str(&raw[last..whole.start()]);
        last = whole.end();

        let name = &caps[1];
        let value = std::env::var(name).ok();
        match (value, caps.get(2).map(|m| m.as_str())) {
            (Some(v), _) => result.push_str(&v),
            (None, Some("-")) => result.push_str(caps.get(3).map(|m| m.as_str()).unwrap_or("")),
            (None, Some("?")) => {
                let msg = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                anyhow::bail!("environment variable {name} is required: {msg}");
            }
            (None, _) => anyhow::bail!("environment variable {name} is not set"),
        }
    }
    result.push_str(&raw[last..]);
    Ok(result)
}
