//! Media transcoding adapter.
//!
//! Wraps the `ffmpeg` binary behind the [`MediaTranscoder`] capability trait.
//! Like the extractor, every invocation is a fresh child process with
//! captured stderr, a timeout, and classified failures.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::TranscodeConfig;
use crate::errors::{ErrorClass, ToolError};

const TOOL: &str = "ffmpeg";

#[derive(Debug, Clone)]
pub struct AudioEncodeOptions {
    pub codec: String,
    pub bitrate: String,
    pub sample_rate: u32,
    pub threads: u32,
}

#[derive(Debug, Clone)]
pub struct VideoEncodeOptions {
    pub codec: String,
    pub crf: u8,
    pub audio_bitrate: String,
    pub threads: u32,
}

impl From<&TranscodeConfig> for AudioEncodeOptions {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            codec: config.audio_format.ffmpeg_codec().to_string(),
            bitrate: config.audio_bitrate.clone(),
            sample_rate: config.audio_sample_rate,
            threads: config.threads,
        }
    }
}

impl From<&TranscodeConfig> for VideoEncodeOptions {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            codec: config.video_codec.clone(),
            crf: config.video_quality,
            audio_bitrate: config.audio_bitrate.clone(),
            threads: config.threads,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub path: PathBuf,
    pub bytes: i64,
}

#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Produce the encoded audio artifact at `output`.
    async fn to_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: &AudioEncodeOptions,
    ) -> Result<TranscodeOutput, ToolError>;

    /// Produce the encoded video artifact at `output` with a streamable
    /// (moov-first) layout.
    async fn to_video(
        &self,
        input: &Path,
        output: &Path,
        opts: &VideoEncodeOptions,
    ) -> Result<TranscodeOutput, ToolError>;
}

pub struct FfmpegTranscoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_binary<S: Into<String>>(binary: S, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), ToolError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
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
            Err(_) => return Err(ToolError::timeout(TOOL, self.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} exited with {}", TOOL, output.status);
            return Err(ToolError::new(
                TOOL,
                ErrorClass::ToolFailure,
                last_stderr_line(&stderr)
                    .unwrap_or_else(|| format!("exit status {}", output.status)),
            ));
        }

        Ok(())
    }

    async fn finish(&self, output: &Path) -> Result<TranscodeOutput, ToolError> {
        let metadata = tokio::fs::metadata(output).await.map_err(|e| {
            ToolError::new(
                TOOL,
                ErrorClass::ToolFailure,
                format!("missing output {}: {e}", output.display()),
            )
        })?;

        if metadata.len() == 0 {
            return Err(ToolError::new(
                TOOL,
                ErrorClass::ToolFailure,
                format!("empty output {}", output.display()),
            ));
        }

        Ok(TranscodeOutput {
            path: output.to_path_buf(),
            bytes: metadata.len() as i64,
        })
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn to_audio(
        &self,
        input: &Path,
        output: &Path,
        opts: &AudioEncodeOptions,
    ) -> Result<TranscodeOutput, ToolError> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            opts.codec.clone(),
            "-b:a".to_string(),
            opts.bitrate.clone(),
            "-ar".to_string(),
            opts.sample_rate.to_string(),
            "-threads".to_string(),
            opts.threads.to_string(),
            output.to_string_lossy().to_string(),
        ];

        self.run(&args).await?;
        self.finish(output).await
    }

    async fn to_video(
        &self,
        input: &Path,
        output: &Path,
        opts: &VideoEncodeOptions,
    ) -> Result<TranscodeOutput, ToolError> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            opts.codec.clone(),
            "-crf".to_string(),
            opts.crf.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            opts.audio_bitrate.clone(),
            // moov atom up front so clients can start playback while streaming
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-threads".to_string(),
            opts.threads.to_string(),
            output.to_string_lossy().to_string(),
        ];

        self.run(&args).await?;
        self.finish(output).await
    }
}

fn last_stderr_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioFormat;

    #[test]
    fn audio_options_follow_config() {
        let mut config = TranscodeConfig::default();
        config.audio_format = AudioFormat::Ogg;
        config.audio_bitrate = "96k".to_string();
        let opts = AudioEncodeOptions::from(&config);
        assert_eq!(opts.codec, "libvorbis");
        assert_eq!(opts.bitrate, "96k");
    }

    #[test]
    fn video_options_follow_config() {
        let mut config = TranscodeConfig::default();
        config.video_quality = 28;
        let opts = VideoEncodeOptions::from(&config);
        assert_eq!(opts.crf, 28);
        assert_eq!(opts.codec, "libx264");
    }

    #[test]
    fn last_stderr_line_skips_blanks() {
        assert_eq!(
            last_stderr_line("frame=1\nConversion failed!\n\n"),
            Some("Conversion failed!".to_string())
        );
        assert_eq!(last_stderr_line("\n\n"), None);
    }
}
