use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Make a video title safe to use as a file name.
///
/// Path separators and characters reserved on Windows are removed.
pub fn make_safe_filename(title: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();

    let safe = safe.trim().trim_end_matches('.').trim();
    if safe.is_empty() {
        "video".to_string()
    } else {
        safe.to_string()
    }
}

/// Download target for a platform video; the id keeps same-titled videos apart
pub fn media_file_name(title: &str, id: &str) -> String {
    format!("{} [{}].mp4", make_safe_filename(title), make_safe_filename(id))
}

/// First `limit` characters of `text`, and whether anything was cut
pub fn truncate_chars(text: &str, limit: usize) -> (&str, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Spinner for a long-running step, hidden when progress display is off
pub fn spinner(message: impl Into<String>, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str, whisper: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!("{} - required to download Bilibili and YouTube media", yt_dlp));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!("{} - required to extract audio for transcription", ffmpeg));
    }

    if !check_command_available(whisper, "--help").await {
        missing.push(format!("{} - required for speech recognition", whisper));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, probe_arg: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(probe_arg)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_safe_filename() {
        assert_eq!(make_safe_filename("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(make_safe_filename("【中文】标题 Part 1"), "【中文】标题 Part 1");
        assert_eq!(make_safe_filename("  ??  "), "video");
    }

    #[test]
    fn test_media_file_name_includes_id() {
        assert_eq!(media_file_name("Intro: Rust", "BV1xx411c7mD"), "Intro Rust [BV1xx411c7mD].mp4");
        assert_ne!(media_file_name("Trailer", "aaaaaaaaaaa"), media_file_name("Trailer", "bbbbbbbbbbb"));
    }

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("你好世界", 2), ("你好", true));
        assert_eq!(truncate_chars("abc", 3), ("abc", false));
        assert_eq!(truncate_chars("", 0), ("", false));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[tokio::test]
    async fn test_missing_dependencies_are_reported() {
        let missing = check_dependencies(
            "video-captions-missing-a",
            "video-captions-missing-b",
            "video-captions-missing-c",
        )
        .await;
        assert_eq!(missing.len(), 3);
        assert!(missing[2].contains("speech recognition"));
    }
}
