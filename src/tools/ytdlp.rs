use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{run_tool, truncate_stderr};
use crate::credentials::Browser;
use crate::utils::spinner;
use crate::{CaptionError, Result};

/// yt-dlp wrapper used for metadata, subtitles and media downloads
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    cookies_from_browser: Option<Browser>,
    show_progress: bool,
}

impl YtDlp {
    pub fn new(program: impl Into<String>, cookies_from_browser: Option<Browser>) -> Self {
        Self {
            program: program.into(),
            cookies_from_browser,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn args<I, S>(&self, rest: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(browser) = self.cookies_from_browser {
            args.push("--cookies-from-browser".into());
            args.push(browser.as_str().into());
        }
        args.extend(rest.into_iter().map(Into::into));
        args
    }

    async fn run(&self, args: Vec<OsString>, context: &str) -> Result<Vec<u8>> {
        let output = run_tool(&self.program, args).await?;
        if !output.status.success() {
            let stderr = truncate_stderr(&output.stderr);
            return Err(classify_failure(&self.program, context, stderr).into());
        }
        Ok(output.stdout)
    }

    /// Video metadata as printed by `--dump-json`
    pub async fn dump_json(&self, url: &str) -> Result<Value> {
        tracing::debug!("Extracting video info for: {}", url);

        let stdout = self
            .run(
                self.args(["--dump-json", "--no-download", "--no-playlist", url]),
                "reading video metadata",
            )
            .await?;

        let info: Value = serde_json::from_slice(&stdout)?;
        Ok(info)
    }

    /// Download `url` to `output`, reusing a previous non-empty download
    pub async fn download(&self, url: &str, output: &Path) -> Result<PathBuf> {
        if let Ok(metadata) = fs_err::metadata(output) {
            if metadata.len() > 0 {
                tracing::info!("Reusing downloaded media: {}", output.display());
                return Ok(output.to_path_buf());
            }
        }

        if let Some(parent) = output.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let pb = spinner(format!("Downloading {}", url), self.show_progress);
        let result = self
            .run(
                self.args([
                    OsString::from("--no-playlist"),
                    OsString::from("--format"),
                    OsString::from("bestaudio[ext=m4a]/bestaudio/best"),
                    OsString::from("--output"),
                    output.as_os_str().to_owned(),
                    OsString::from(url),
                ]),
                "downloading media",
            )
            .await;
        pb.finish_and_clear();
        result?;

        if !output.exists() {
            return Err(CaptionError::ExternalTool {
                tool: self.program.clone(),
                message: format!("download finished but {} was not written", output.display()),
                stderr: None,
            }
            .into());
        }

        Ok(output.to_path_buf())
    }

    /// Write the `language` subtitle track as json3 into `dir`
    pub async fn write_subtitles(&self, url: &str, language: &str, dir: &Path) -> Result<Option<PathBuf>> {
        let template = dir.join("subtitle.%(ext)s");

        self.run(
            self.args([
                OsString::from("--write-subs"),
                OsString::from("--write-auto-subs"),
                OsString::from("--sub-langs"),
                OsString::from(language),
                OsString::from("--sub-format"),
                OsString::from("json3"),
                OsString::from("--skip-download"),
                OsString::from("--no-playlist"),
                OsString::from("--output"),
                template.into_os_string(),
                OsString::from(url),
            ]),
            "downloading subtitles",
        )
        .await?;

        let found = fs_err::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| path.extension().is_some_and(|ext| ext == "json3"));

        Ok(found)
    }
}

/// Map yt-dlp stderr to an error category
pub fn classify_failure(program: &str, context: &str, stderr: String) -> CaptionError {
    let lower = stderr.to_lowercase();

    if stderr.contains("Sign in") || lower.contains("confirm your age") {
        CaptionError::NoCredential(format!(
            "{} requires a signed-in session; log in with a browser and pass --browser",
            context
        ))
    } else if lower.contains("video unavailable") || lower.contains("does not exist") {
        CaptionError::NotFound(format!("{}: {}", context, stderr))
    } else {
        CaptionError::ExternalTool {
            tool: program.to_string(),
            message: format!("{} failed", context),
            stderr: Some(stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("yt-dlp", "x", "ERROR: Sign in to confirm you're not a bot".into());
        assert_eq!(err.kind(), ErrorKind::NoCredential);

        let err = classify_failure("yt-dlp", "x", "ERROR: [youtube] abc: Video unavailable".into());
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = classify_failure("yt-dlp", "x", "ERROR: Unable to download webpage: HTTP Error 429".into());
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
        assert!(err.diagnostic().unwrap().contains("429"));
    }

    #[test]
    fn test_cookie_flag_is_prepended() {
        let ytdlp = YtDlp::new("yt-dlp", Some(Browser::Firefox));
        let args = ytdlp.args(["--dump-json", "URL"]);
        assert_eq!(args[0], "--cookies-from-browser");
        assert_eq!(args[1], "firefox");
        assert_eq!(args[3], "URL");

        let plain = YtDlp::new("yt-dlp", None);
        assert_eq!(plain.args(["URL"]), vec![OsString::from("URL")]);
    }

    #[tokio::test]
    async fn test_existing_download_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        fs_err::write(&output, b"media").unwrap();

        // The program does not exist, so success proves nothing was spawned
        let ytdlp = YtDlp::new("video-captions-no-such-ytdlp", None);
        let path = ytdlp.download("https://example.invalid/v", &output).await.unwrap();
        assert_eq!(path, output);
    }
}
