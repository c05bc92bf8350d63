use async_trait::async_trait;
use std::ffi::OsStr;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::{CaptionBackend, CaptionSegment, CaptionTrack, LanguagePolicy, MediaFile, VideoInfo};
use crate::tools::run_tool;
use crate::{CaptionError, Result};

pub const NAME: &str = "local";

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "flac", "ogg", "wma", "opus"];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "flv", "wmv", "webm", "m4v", "mpg", "mpeg",
];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_supported_extension(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| {
        AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
    })
}

/// An existing file with a known audio or video extension
pub fn is_local_media(source: &str) -> bool {
    let path = Path::new(source.trim());
    path.is_file() && is_supported_extension(path)
}

/// An existing file this tool cannot handle
pub fn is_unsupported_file(source: &str) -> bool {
    let path = Path::new(source.trim());
    path.is_file() && !is_supported_extension(path)
}

/// Comma separated list of accepted extensions
pub fn supported_extensions() -> String {
    AUDIO_EXTENSIONS
        .iter()
        .chain(VIDEO_EXTENSIONS)
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Local audio and video files; always transcribed
pub struct LocalFileBackend {
    policy: LanguagePolicy,
}

impl LocalFileBackend {
    pub fn new() -> Self {
        Self {
            policy: LanguagePolicy::default(),
        }
    }

    /// Check if the file exists and is readable
    fn validate_file(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(CaptionError::NotFound(format!("no such file: {}", path.display())).into());
        }
        if !is_supported_extension(path) {
            return Err(CaptionError::UnsupportedFormat(format!(
                "{} (supported: {})",
                path.display(),
                supported_extensions()
            ))
            .into());
        }

        let metadata = fs_err::metadata(path)?;
        if metadata.len() == 0 {
            return Err(CaptionError::ExternalTool {
                tool: NAME.to_string(),
                message: format!("file is empty: {}", path.display()),
                stderr: None,
            }
            .into());
        }

        Ok(())
    }

    /// Duration reported by ffprobe, when it is installed
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let output = run_tool(
            "ffprobe",
            [
                OsStr::new("-v"),
                OsStr::new("quiet"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_format"),
                path.as_os_str(),
            ],
        )
        .await
        .ok()?;

        if !output.status.success() {
            return None;
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
        info["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
    }
}

impl Default for LocalFileBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Stem plus a digest of the canonical path, size and modification time.
///
/// Same-named files in different directories get different keys, and an
/// edited file stops matching audio extracted from its previous contents.
pub fn cache_key(path: &Path) -> Result<String> {
    let canonical = fs_err::canonicalize(path)?;
    let metadata = fs_err::metadata(&canonical)?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update(metadata.len().to_le_bytes());
    hasher.update(modified.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Ok(format!("{}-{}", file_stem(path), &digest[..16]))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string())
}

#[async_trait]
impl CaptionBackend for LocalFileBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self, source: &str) -> bool {
        is_local_media(source)
    }

    fn offers_platform_captions(&self) -> bool {
        false
    }

    fn language_policy(&self) -> &LanguagePolicy {
        &self.policy
    }

    async fn fetch_metadata(&self, source: &str) -> Result<VideoInfo> {
        let path = Path::new(source.trim());
        self.validate_file(path)?;

        let stem = file_stem(path);
        let duration = self.probe_duration(path).await.unwrap_or(0.0);

        Ok(VideoInfo {
            title: stem.clone(),
            id: stem,
            duration_seconds: duration.max(0.0) as u64,
            description: path.display().to_string(),
            author: None,
            has_captions: false,
        })
    }

    async fn list_captions(&self, _source: &str) -> Result<Vec<CaptionTrack>> {
        Ok(Vec::new())
    }

    async fn fetch_caption_track(&self, source: &str, _track: &CaptionTrack) -> Result<Vec<CaptionSegment>> {
        Err(CaptionError::NoCaptionTrack(format!("{} is a local file", source)).into())
    }

    async fn prepare_media(&self, source: &str, _work_dir: &Path) -> Result<MediaFile> {
        let path = Path::new(source.trim());
        self.validate_file(path)?;

        let stem = file_stem(path);
        Ok(MediaFile {
            path: path.to_path_buf(),
            title: stem.clone(),
            id: stem,
            cache_key: cache_key(path)?,
            needs_extraction: extension_of(path).as_deref() != Some("wav"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_extension_checks() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Lecture.MKV");
        let notes = dir.path().join("notes.txt");
        fs_err::write(&video, b"data").unwrap();
        fs_err::write(&notes, b"data").unwrap();

        assert!(is_local_media(video.to_str().unwrap()));
        assert!(!is_local_media(notes.to_str().unwrap()));
        assert!(is_unsupported_file(notes.to_str().unwrap()));
        assert!(!is_local_media(dir.path().join("missing.mp4").to_str().unwrap()));
        assert!(supported_extensions().contains(".opus"));
    }

    #[tokio::test]
    async fn test_prepare_media_marks_wav_as_ready() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("voice memo.wav");
        let mp4 = dir.path().join("clip.mp4");
        fs_err::write(&wav, b"RIFF").unwrap();
        fs_err::write(&mp4, b"....").unwrap();

        let backend = LocalFileBackend::new();
        let media = backend.prepare_media(wav.to_str().unwrap(), dir.path()).await.unwrap();
        assert_eq!(media.path, wav);
        assert_eq!(media.title, "voice memo");
        assert!(!media.needs_extraction);

        let media = backend.prepare_media(mp4.to_str().unwrap(), dir.path()).await.unwrap();
        assert!(media.needs_extraction);
    }

    #[test]
    fn test_cache_key_separates_same_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a").join("talk.mp4");
        let second = dir.path().join("b").join("talk.mp4");
        for (path, body) in [(&first, "video A"), (&second, "video B")] {
            fs_err::create_dir_all(path.parent().unwrap()).unwrap();
            fs_err::write(path, body).unwrap();
        }

        let key_a = cache_key(&first).unwrap();
        let key_b = cache_key(&second).unwrap();
        assert!(key_a.starts_with("talk-"));
        assert_ne!(key_a, key_b);
        assert_eq!(cache_key(&first).unwrap(), key_a);

        fs_err::write(&first, "video A, re-encoded").unwrap();
        assert_ne!(cache_key(&first).unwrap(), key_a);
    }

    #[tokio::test]
    async fn test_local_files_offer_no_tracks() {
        let backend = LocalFileBackend::new();
        assert!(!backend.offers_platform_captions());
        assert!(backend.list_captions("whatever.mp3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("podcast-42.mp3");
        fs_err::write(&audio, b"ID3").unwrap();

        let info = LocalFileBackend::new()
            .fetch_metadata(audio.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(info.title, "podcast-42");
        assert_eq!(info.id, "podcast-42");
        assert!(!info.has_captions);
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.mp3");
        fs_err::write(&empty, b"").unwrap();

        let err = LocalFileBackend::new()
            .prepare_media(empty.to_str().unwrap(), dir.path())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::classify(&err), ErrorKind::ExternalToolFailure);
    }
}
