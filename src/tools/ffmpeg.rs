use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::{partial_path, run_tool, truncate_stderr, AudioExtractor};
use crate::{CaptionError, Result};

/// Audio extraction with ffmpeg
pub struct FfmpegExtractor {
    program: String,
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn failure(&self, message: String, stderr: Option<String>) -> CaptionError {
        CaptionError::ExternalTool {
            tool: self.program.clone(),
            message,
            stderr,
        }
    }
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract_audio(&self, video: &Path, target: &Path) -> Result<PathBuf> {
        let size = match fs_err::metadata(video) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                return Err(self
                    .failure(format!("input file does not exist: {}", video.display()), None)
                    .into())
            }
        };
        if size == 0 {
            return Err(self
                .failure(format!("input file is empty: {}", video.display()), None)
                .into());
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }
        let partial = partial_path(target);

        tracing::debug!("Extracting audio: {} -> {}", video.display(), target.display());

        let output = match run_tool(
            &self.program,
            [
                OsStr::new("-y"),
                OsStr::new("-i"),
                video.as_os_str(),
                OsStr::new("-vn"),
                OsStr::new("-acodec"),
                OsStr::new("pcm_s16le"),
                OsStr::new("-ar"),
                OsStr::new("16000"),
                OsStr::new("-ac"),
                OsStr::new("1"),
                OsStr::new("-f"),
                OsStr::new("wav"),
                partial.as_os_str(),
            ],
        )
        .await
        {
            Ok(output) => output,
            Err(e) => {
                let _ = fs_err::remove_file(&partial);
                return Err(e);
            }
        };

        if !output.status.success() {
            let _ = fs_err::remove_file(&partial);
            return Err(self
                .failure(
                    format!(
                        "audio extraction exited with {} for {} ({} bytes)",
                        output.status,
                        video.display(),
                        size
                    ),
                    Some(truncate_stderr(&output.stderr)),
                )
                .into());
        }

        fs_err::rename(&partial, target)?;
        Ok(target.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{find_caption_error, ErrorKind};

    #[tokio::test]
    async fn test_missing_input_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegExtractor::default()
            .extract_audio(&dir.path().join("missing.mp4"), &dir.path().join("missing.wav"))
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::classify(&err), ErrorKind::ExternalToolFailure);
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_empty_input_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("empty.mp4");
        fs_err::write(&video, b"").unwrap();

        let err = FfmpegExtractor::default()
            .extract_audio(&video, &dir.path().join("empty.wav"))
            .await
            .unwrap_err();

        let caption_err = find_caption_error(&err).unwrap();
        assert!(caption_err.to_string().contains("empty"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_extraction_leaves_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        fs_err::write(&video, b"video bytes").unwrap();
        let ffmpeg = crate::tools::fake_tool::install(
            dir.path(),
            "ffmpeg",
            r#"for last; do :; done; printf 'half an audio file' > "$last"; echo 'Conversion failed!' >&2; exit 1"#,
        );
        let target = dir.path().join("cache").join("talk.wav");

        let err = FfmpegExtractor::new(ffmpeg.to_str().unwrap())
            .extract_audio(&video, &target)
            .await
            .unwrap_err();

        assert_eq!(find_caption_error(&err).unwrap().diagnostic(), Some("Conversion failed!"));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_extraction_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        fs_err::write(&video, b"video bytes").unwrap();
        let ffmpeg = crate::tools::fake_tool::install(
            dir.path(),
            "ffmpeg",
            r#"for last; do :; done; printf 'RIFF....WAVE' > "$last""#,
        );
        let target = dir.path().join("talk.wav");

        let written = FfmpegExtractor::new(ffmpeg.to_str().unwrap())
            .extract_audio(&video, &target)
            .await
            .unwrap();

        assert_eq!(written, target);
        assert_eq!(fs_err::read_to_string(&target).unwrap(), "RIFF....WAVE");
        assert!(!partial_path(&target).exists());
    }
}
