//! Upstream metadata and download adapter.
//!
//! Wraps the `yt-dlp` binary behind the [`VideoExtractor`] capability trait.
//! Every invocation is a fresh child process with captured output and a
//! timeout; failures are classified into the shared [`ErrorClass`] taxonomy
//! so callers never inspect tool output themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{ErrorClass, ToolError};
use crate::models::{VideoListing, VideoMetadata};

const TOOL: &str = "yt-dlp";

#[async_trait]
pub trait VideoExtractor: Send + Sync {
    /// Flat listing of a channel's most recent videos, newest first,
    /// bounded by `limit`. Idempotent.
    async fn list_channel_videos(
        &self,
        channel_url: &str,
        limit: usize,
    ) -> Result<Vec<VideoListing>, ToolError>;

    /// Full metadata for a single video. Idempotent.
    async fn fetch_video_metadata(&self, video_id: &str) -> Result<VideoMetadata, ToolError>;

    /// Download the source media into `dest_dir`, returning the produced
    /// file path (extension chosen by the tool).
    async fn download_video(&self, video_id: &str, dest_dir: &Path)
        -> Result<PathBuf, ToolError>;
}

pub struct YtDlpExtractor {
    binary: String,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_binary<S: Into<String>>(binary: S, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ToolError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::new(TOOL, ErrorClass::ToolFailure, format!("failed to spawn: {e}"))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                ToolError::new(TOOL, ErrorClass::ToolFailure, format!("wait failed: {e}"))
            })?,
            // kill_on_drop reaps the child once the timed-out future is dropped
            Err(_) => return Err(ToolError::timeout(TOOL, self.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let class = classify_stderr(&stderr);
            warn!("{} exited with {}: {}", TOOL, output.status, stderr.trim());
            return Err(ToolError::new(
                TOOL,
                class,
                first_error_line(&stderr).unwrap_or_else(|| format!("exit status {}", output.status)),
            ));
        }

        Ok(output)
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoExtractor for YtDlpExtractor {
    async fn list_channel_videos(
        &self,
        channel_url: &str,
        limit: usize,
    ) -> Result<Vec<VideoListing>, ToolError> {
        let limit_arg = limit.to_string();
        let output = self
            .run(&[
                "--flat-playlist",
                "--no-warnings",
                "--playlist-end",
                &limit_arg,
                "--print",
                "%(id)s\t%(title)s\t%(timestamp|)s",
                "--",
                channel_url,
            ])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut listings = Vec::new();
        for line in stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_listing_line(line) {
                Some(listing) => listings.push(listing),
                None => {
                    return Err(ToolError::new(
                        TOOL,
                        ErrorClass::ToolFailure,
                        format!("unparseable listing line: {line}"),
                    ))
                }
            }
        }

        debug!("Listed {} videos for {}", listings.len(), channel_url);
        Ok(listings)
    }

    async fn fetch_video_metadata(&self, video_id: &str) -> Result<VideoMetadata, ToolError> {
        let output = self
            .run(&["--skip-download", "--no-warnings", "-J", "--", video_id])
            .await?;

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            ToolError::new(
                TOOL,
                ErrorClass::ToolFailure,
                format!("metadata JSON parse failed: {e}"),
            )
        })?;

        let title = value
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ToolError::new(TOOL, ErrorClass::ToolFailure, "metadata missing title")
            })?
            .to_string();

        Ok(VideoMetadata {
            title,
            description: value
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            thumbnail_url: value
                .get("thumbnail")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            duration_seconds: value.get("duration").and_then(|v| v.as_i64()),
            published_at: value
                .get("timestamp")
                .and_then(|v| v.as_i64())
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    async fn download_video(
        &self,
        video_id: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        let template = dest_dir.join(format!("{video_id}.%(ext)s"));
        let template_str = template.to_string_lossy().to_string();

        self.run(&[
            "--no-progress",
            "--no-warnings",
            "--no-playlist",
            "-f",
            "bv*+ba/b",
            "-o",
            &template_str,
            "--",
            video_id,
        ])
        .await?;

        // The extension is the tool's choice; locate whatever it produced.
        find_downloaded_file(dest_dir, video_id).await.ok_or_else(|| {
            ToolError::new(
                TOOL,
                ErrorClass::ToolFailure,
                format!("download reported success but no file for {video_id} found"),
            )
        })
    }
}

fn parse_listing_line(line: &str) -> Option<VideoListing> {
    let mut parts = line.splitn(3, '\t');
    let video_id = parts.next()?.trim();
    let title = parts.next()?.trim();
    if video_id.is_empty() || video_id == "NA" {
        return None;
    }

    let published_at = parts
        .next()
        .map(str::trim)
        .filter(|ts| !ts.is_empty() && *ts != "NA")
        .and_then(|ts| ts.parse::<f64>().ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0));

    Some(VideoListing {
        video_id: video_id.to_string(),
        title: title.to_string(),
        published_at,
    })
}

async fn find_downloaded_file(dest_dir: &Path, video_id: &str) -> Option<PathBuf> {
    let prefix = format!("{video_id}.");
    let mut entries = tokio::fs::read_dir(dest_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        // Skip the tool's partial-download artifacts
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Some(entry.path());
        }
    }
    None
}

/// Map tool stderr onto the shared failure taxonomy.
pub(crate) fn classify_stderr(stderr: &str) -> ErrorClass {
    let lower = stderr.to_lowercase();

    if lower.contains("video unavailable")
        || lower.contains("does not exist")
        || lower.contains("404")
        || lower.contains("has been removed")
        || lower.contains("no longer available")
    {
        ErrorClass::NotFound
    } else if lower.contains("private video")
        || lower.contains("sign in to confirm")
        || lower.contains("members-only")
        || lower.contains("403")
        || lower.contains("not available in your country")
    {
        ErrorClass::Forbidden
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection re")
        || lower.contains("network")
        || lower.contains("temporary failure")
        || lower.contains("unable to connect")
        || lower.contains("429")
    {
        ErrorClass::TransientNetwork
    } else {
        ErrorClass::ToolFailure
    }
}

fn first_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_listing_line() {
        let listing = parse_listing_line("abc123\tA Title\t1714550400").unwrap();
        assert_eq!(listing.video_id, "abc123");
        assert_eq!(listing.title, "A Title");
        assert!(listing.published_at.is_some());
    }

    #[test]
    fn parses_listing_line_without_timestamp() {
        let listing = parse_listing_line("abc123\tA Title\t").unwrap();
        assert_eq!(listing.published_at, None);
        let listing = parse_listing_line("abc123\tA Title\tNA").unwrap();
        assert_eq!(listing.published_at, None);
    }

    #[test]
    fn rejects_malformed_listing_line() {
        assert!(parse_listing_line("just-one-field").is_none());
        assert!(parse_listing_line("NA\ttitle\t123").is_none());
    }

    #[test]
    fn classifies_not_found() {
        assert_eq!(
            classify_stderr("ERROR: [youtube] xyz: Video unavailable"),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn classifies_forbidden() {
        assert_eq!(
            classify_stderr("ERROR: [youtube] xyz: Private video. Sign in if you ..."),
            ErrorClass::Forbidden
        );
    }

    #[test]
    fn classifies_transient_network() {
        assert_eq!(
            classify_stderr("ERROR: unable to download webpage: The read operation timed out"),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            classify_stderr("ERROR: HTTP Error 429: Too Many Requests"),
            ErrorClass::TransientNetwork
        );
    }

    #[test]
    fn unknown_errors_are_tool_failures() {
        assert_eq!(
            classify_stderr("ERROR: some totally new breakage"),
            ErrorClass::ToolFailure
        );
    }
}
