//! On-disk media library layout.
//!
//! `<media_root>/<channel_slug>/audio/<video_id>.<ext>`
//! `<media_root>/<channel_slug>/video/<video_id>.<ext>`
//! `<media_root>/temp/` for in-flight downloads.
//!
//! Media files are created by workers and removed only here, on behalf of
//! retention and the delete endpoints.

use anyhow::Result;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and transient directories at startup.
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn variant_dir(&self, slug: &str, kind: MediaKind) -> PathBuf {
        self.root.join(slug).join(kind.as_str())
    }

    /// Library-relative path stored in episode rows and used in feed URLs.
    pub fn relative_path(slug: &str, kind: MediaKind, filename: &str) -> String {
        format!("{}/{}/{}", slug, kind.as_str(), filename)
    }

    /// Resolve a stored relative path, refusing anything that would escape
    /// the media root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return None;
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return None,
            }
        }
        Some(self.root.join(rel))
    }

    /// Remove a media file by its stored relative path. Missing files are
    /// tolerated so retention stays idempotent.
    pub async fn remove_media(&self, relative: &str) -> Result<()> {
        let Some(path) = self.resolve(relative) else {
            warn!("Refusing to remove suspicious media path: {}", relative);
            return Ok(());
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed media file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a temporary download artifact, tolerating absence.
    pub async fn remove_temp(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes used by the library, temp included.
    pub async fn disk_usage(&self) -> u64 {
        let mut total = 0u64;
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if let Ok(metadata) = entry.metadata().await {
                    total += metadata.len();
                }
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_layout() {
        assert_eq!(
            MediaStorage::relative_path("my-channel", MediaKind::Audio, "abc.mp3"),
            "my-channel/audio/abc.mp3"
        );
    }

    #[test]
    fn resolve_rejects_traversal() {
        let storage = MediaStorage::new("/srv/media");
        assert!(storage.resolve("../etc/passwd").is_none());
        assert!(storage.resolve("/etc/passwd").is_none());
        assert!(storage.resolve("slug/audio/../../../etc").is_none());
        assert!(storage.resolve("slug/audio/ep.mp3").is_some());
    }

    #[tokio::test]
    async fn disk_usage_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());
        storage.ensure_layout().unwrap();

        let sub = storage.variant_dir("ch", MediaKind::Audio);
        tokio::fs::create_dir_all(&sub).await.unwrap();
        tokio::fs::write(sub.join("a.mp3"), b"12345").await.unwrap();
        tokio::fs::write(storage.temp_dir().join("b.tmp"), b"123")
            .await
            .unwrap();

        assert_eq!(storage.disk_usage().await, 8);
    }

    #[tokio::test]
    async fn remove_media_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());
        storage.ensure_layout().unwrap();

        let sub = storage.variant_dir("ch", MediaKind::Audio);
        tokio::fs::create_dir_all(&sub).await.unwrap();
        tokio::fs::write(sub.join("a.mp3"), b"x").await.unwrap();

        storage.remove_media("ch/audio/a.mp3").await.unwrap();
        assert!(!sub.join("a.mp3").exists());
        // Second removal of a now-missing file still succeeds
        storage.remove_media("ch/audio/a.mp3").await.unwrap();
    }
}
