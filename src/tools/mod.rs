//! External process collaborators: audio extraction and media download

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

pub mod ffmpeg;
pub mod ytdlp;

pub use ffmpeg::FfmpegExtractor;
pub use ytdlp::YtDlp;

use crate::utils::make_safe_filename;
use crate::{CaptionError, Result};

/// Characters of tool stderr kept for diagnostics
pub const STDERR_LIMIT: usize = 500;

/// Turns a media file into 16 kHz mono wav audio
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Writes wav audio to `target` and returns its path.
    ///
    /// `target` only appears once extraction has fully succeeded.
    async fn extract_audio(&self, video: &Path, target: &Path) -> Result<PathBuf>;
}

/// Audio file for the media identified by `cache_key`
pub fn audio_path_for(cache_key: &str, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}.wav", make_safe_filename(cache_key)))
}

/// In-progress sibling of `target`, renamed over it on success
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Lossy stderr, trimmed and cut to [`STDERR_LIMIT`] characters
pub fn truncate_stderr(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .trim()
        .chars()
        .take(STDERR_LIMIT)
        .collect()
}

/// Run `program` to completion, capturing its output.
///
/// A missing executable is reported as an external tool failure rather than
/// a bare I/O error.
pub async fn run_tool<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) => Ok(output),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CaptionError::ExternalTool {
            tool: program.to_string(),
            message: format!("{} not found on PATH", program),
            stderr: None,
        }
        .into()),
        Err(e) => Err(CaptionError::ExternalTool {
            tool: program.to_string(),
            message: format!("could not start {}: {}", program, e),
            stderr: None,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, find_caption_error};

    #[test]
    fn test_audio_path_for() {
        assert_eq!(
            audio_path_for("youtube-dQw4w9WgXcQ", Path::new("/work")),
            PathBuf::from("/work/youtube-dQw4w9WgXcQ.wav")
        );
        assert_eq!(
            partial_path(Path::new("/work/talk-0a1b.wav")),
            PathBuf::from("/work/talk-0a1b.wav.part")
        );
    }

    #[test]
    fn test_truncate_stderr() {
        let long = "x".repeat(STDERR_LIMIT * 2);
        assert_eq!(truncate_stderr(long.as_bytes()).len(), STDERR_LIMIT);
        assert_eq!(truncate_stderr(b"  oops \n"), "oops");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_failure() {
        let err = run_tool("video-captions-no-such-binary", ["--version"])
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::classify(&err), ErrorKind::ExternalToolFailure);
        assert!(find_caption_error(&err).unwrap().to_string().contains("not found"));
    }
}
