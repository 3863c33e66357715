//! Utility functions shared across the tubefeed application
//!
//! This module provides various helper functions including:
//! - Channel slug derivation for filesystem-safe paths
//! - DateTime parsing utilities for SQLite-stored timestamps
//! - Feed-facing formatting (durations, media types)

use chrono::{DateTime, NaiveDateTime, Utc};

/// Maximum length of a derived channel slug.
pub const SLUG_MAX_LEN: usize = 50;

/// Derive a filesystem-safe slug from a channel title: lowercased,
/// non-alphanumeric runs collapsed to a single `-`, trimmed, capped at
/// [`SLUG_MAX_LEN`] characters.
pub fn channel_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(SLUG_MAX_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "channel".to_string()
    } else {
        slug
    }
}

/// Parse datetime from SQLite format or RFC3339 format
pub fn parse_datetime(datetime_str: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    // Try parsing as RFC3339 first (with timezone info)
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try parsing as naive datetime and assume UTC
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
    }

    Err(sqlx::Error::Decode(
        format!("Unable to parse datetime: {}", datetime_str).into(),
    ))
}

/// Sanitize a base URL by removing trailing slashes and ensuring proper format
pub fn sanitize_base_url(base_url: &str) -> String {
    let mut url = base_url.trim().to_string();

    while url.ends_with('/') {
        url.pop();
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{}", url);
    }

    url
}

/// Format a duration in seconds the way podcast clients expect:
/// `H:MM:SS`, or `M:SS` when under one hour.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Media (MIME) type for an enclosure, derived from the file extension.
/// Unknown extensions fall back to `application/octet-stream`.
pub fn media_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default();

    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
