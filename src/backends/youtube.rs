use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use url::Url;

use super::{BackendContext, CaptionBackend, CaptionSegment, CaptionTrack, LanguagePolicy, MediaFile, VideoInfo};
use crate::tools::YtDlp;
use crate::utils::media_file_name;
use crate::{CaptionError, Result};

pub const NAME: &str = "youtube";

pub const DEFAULT_LANGUAGE_PRIORITY: &[&str] = &[
    "zh-Hans-en",
    "zh-Hant-en",
    "zh-Hans",
    "zh-Hant",
    "zh-CN",
    "zh-TW",
    "zh-HK",
    "zh",
    "zh*",
    "en",
];

fn video_id_pattern() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"))
}

fn valid_id(candidate: &str) -> Option<String> {
    video_id_pattern()
        .is_match(candidate)
        .then(|| candidate.to_string())
}

/// Whether `source` looks like a YouTube video reference
pub fn is_youtube_source(source: &str) -> bool {
    extract_video_id(source).is_ok()
}

/// Video id from youtu.be, watch, shorts, embed and /v/ links or a bare id
pub fn extract_video_id(source: &str) -> Result<String> {
    let source = source.trim();

    if let Some(id) = valid_id(source) {
        return Ok(id);
    }

    let parsed = Url::parse(source).or_else(|_| Url::parse(&format!("https://{}", source)));
    if let Ok(url) = parsed {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host
            .trim_start_matches("www.")
            .trim_start_matches("m.")
            .trim_start_matches("music.");
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        let candidate = match (host, segments.as_slice()) {
            ("youtu.be", [id, ..]) => Some(id.to_string()),
            ("youtube.com" | "youtube-nocookie.com", ["watch", ..]) => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, v)| v.into_owned()),
            ("youtube.com" | "youtube-nocookie.com", ["shorts" | "embed" | "v" | "live", id, ..]) => {
                Some(id.to_string())
            }
            _ => None,
        };

        if let Some(id) = candidate.as_deref().and_then(valid_id) {
            return Ok(id);
        }
    }

    Err(CaptionError::InvalidReference(format!("no YouTube video id in '{}'", source)).into())
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Metadata from a yt-dlp `--dump-json` document
pub fn video_info_from_dump(video_id: &str, dump: &Value) -> VideoInfo {
    let author = dump["uploader"]
        .as_str()
        .or_else(|| dump["channel"].as_str())
        .map(|s| s.to_string());

    VideoInfo {
        title: dump["title"].as_str().unwrap_or_default().to_string(),
        id: video_id.to_string(),
        duration_seconds: dump["duration"].as_f64().unwrap_or(0.0).max(0.0) as u64,
        description: dump["description"].as_str().unwrap_or_default().to_string(),
        author,
        has_captions: !tracks_from_dump(dump).is_empty(),
    }
}

/// Manual subtitles first, then automatic captions not already listed
pub fn tracks_from_dump(dump: &Value) -> Vec<CaptionTrack> {
    let mut tracks: Vec<CaptionTrack> = Vec::new();

    for key in ["subtitles", "automatic_captions"] {
        let Some(languages) = dump[key].as_object() else {
            continue;
        };
        for (code, formats) in languages {
            if tracks.iter().any(|t| &t.language_code == code) {
                continue;
            }

            let formats = formats.as_array().map(Vec::as_slice).unwrap_or_default();
            let label = formats
                .iter()
                .find_map(|f| f["name"].as_str())
                .unwrap_or(code)
                .to_string();
            let fetch_url = formats
                .iter()
                .find(|f| f["ext"] == "json3")
                .and_then(|f| f["url"].as_str())
                .map(|s| s.to_string());

            tracks.push(CaptionTrack {
                language_code: code.clone(),
                language_label: label,
                fetch_url,
            });
        }
    }

    tracks
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: f64,
    #[serde(default)]
    d_duration_ms: f64,
    segs: Option<Vec<Json3Seg>>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Timed events of a json3 subtitle file, blank events dropped
pub fn parse_json3(body: &str) -> Result<Vec<CaptionSegment>> {
    let parsed: Json3 = serde_json::from_str(body).context("malformed json3 subtitles")?;

    Ok(parsed
        .events
        .into_iter()
        .filter_map(|event| {
            let text = match event.segs {
                Some(segs) => segs.into_iter().map(|s| s.utf8).collect::<String>(),
                None => event.text.unwrap_or_default(),
            };
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let start = event.t_start_ms / 1000.0;
            let end = (event.t_start_ms + event.d_duration_ms) / 1000.0;
            Some(CaptionSegment::new(start, end, text))
        })
        .collect())
}

/// YouTube backend driven by yt-dlp
pub struct YoutubeBackend {
    http: reqwest::Client,
    ytdlp: YtDlp,
    policy: LanguagePolicy,
    dumps: Mutex<HashMap<String, Value>>,
}

impl YoutubeBackend {
    pub fn from_context(ctx: &BackendContext) -> Self {
        Self {
            http: ctx.http.clone(),
            ytdlp: YtDlp::new(&ctx.config.tools.yt_dlp, ctx.browser.named())
                .with_progress(ctx.show_progress),
            policy: LanguagePolicy::from_entries(&ctx.config.youtube.language_priority),
            dumps: Mutex::new(HashMap::new()),
        }
    }

    async fn dump(&self, video_id: &str) -> Result<Value> {
        if let Some(dump) = self.dumps.lock().ok().and_then(|d| d.get(video_id).cloned()) {
            return Ok(dump);
        }

        let dump = self.ytdlp.dump_json(&watch_url(video_id)).await?;
        if let Ok(mut dumps) = self.dumps.lock() {
            dumps.insert(video_id.to_string(), dump.clone());
        }
        Ok(dump)
    }
}

#[async_trait]
impl CaptionBackend for YoutubeBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self, source: &str) -> bool {
        is_youtube_source(source)
    }

    fn language_policy(&self) -> &LanguagePolicy {
        &self.policy
    }

    async fn fetch_metadata(&self, source: &str) -> Result<VideoInfo> {
        let video_id = extract_video_id(source)?;
        let dump = self.dump(&video_id).await?;
        Ok(video_info_from_dump(&video_id, &dump))
    }

    async fn list_captions(&self, source: &str) -> Result<Vec<CaptionTrack>> {
        let video_id = extract_video_id(source)?;
        let dump = self.dump(&video_id).await?;
        let tracks = tracks_from_dump(&dump);
        tracing::debug!("{} caption tracks for {}", tracks.len(), video_id);
        Ok(tracks)
    }

    async fn fetch_caption_track(&self, source: &str, track: &CaptionTrack) -> Result<Vec<CaptionSegment>> {
        let body = match &track.fetch_url {
            Some(url) => self
                .http
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?,
            None => {
                let video_id = extract_video_id(source)?;
                let dir = tempfile::Builder::new().prefix("video-captions-subs-").tempdir()?;
                let file = self
                    .ytdlp
                    .write_subtitles(&watch_url(&video_id), &track.language_code, dir.path())
                    .await?
                    .ok_or_else(|| {
                        CaptionError::NoCaptionTrack(format!(
                            "yt-dlp wrote no '{}' subtitles",
                            track.language_code
                        ))
                    })?;
                fs_err::read_to_string(file)?
            }
        };

        let segments = parse_json3(&body)?;
        tracing::info!("Fetched {} captions ({})", segments.len(), track.language_code);
        Ok(segments)
    }

    async fn prepare_media(&self, source: &str, work_dir: &Path) -> Result<MediaFile> {
        let info = self.fetch_metadata(source).await?;
        let output = work_dir.join(media_file_name(&info.title, &info.id));

        let path = self.ytdlp.download(&watch_url(&info.id), &output).await?;

        Ok(MediaFile {
            path,
            title: info.title,
            cache_key: format!("youtube-{}", info.id),
            id: info.id,
            needs_extraction: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_extract_video_id_forms() {
        for source in [
            "dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(source).unwrap(), "dQw4w9WgXcQ", "{}", source);
        }
    }

    #[test]
    fn test_rejects_non_youtube_references() {
        for source in [
            "not-a-valid-source",
            "https://www.youtube.com/watch?v=short",
            "https://vimeo.com/dQw4w9WgXcQ",
            "https://www.youtube.com/channel/UC123",
        ] {
            let err = extract_video_id(source).unwrap_err();
            assert_eq!(ErrorKind::classify(&err), ErrorKind::InvalidReference, "{}", source);
        }
    }

    #[test]
    fn test_tracks_keep_upstream_order_and_dedupe() {
        let dump = json!({
            "title": "Talk",
            "duration": 61.5,
            "channel": "Someone",
            "subtitles": {
                "en": [{"ext": "vtt", "url": "https://x/en.vtt", "name": "English"},
                       {"ext": "json3", "url": "https://x/en.json3", "name": "English"}],
                "zh-Hans": [{"ext": "srv1", "url": "https://x/zh.srv1"}]
            },
            "automatic_captions": {
                "en": [{"ext": "json3", "url": "https://x/auto-en.json3"}],
                "zh-Hans-en": [{"ext": "json3", "url": "https://x/tr.json3", "name": "Chinese (Simplified) from English"}]
            }
        });

        let tracks = tracks_from_dump(&dump);
        let codes: Vec<&str> = tracks.iter().map(|t| t.language_code.as_str()).collect();
        assert_eq!(codes, ["en", "zh-Hans", "zh-Hans-en"]);
        assert_eq!(tracks[0].fetch_url.as_deref(), Some("https://x/en.json3"));
        assert_eq!(tracks[1].fetch_url, None);
        assert_eq!(tracks[1].language_label, "zh-Hans");

        let info = video_info_from_dump("dQw4w9WgXcQ", &dump);
        assert_eq!(info.duration_seconds, 61);
        assert_eq!(info.author.as_deref(), Some("Someone"));
        assert!(info.has_captions);

        let chosen = LanguagePolicy::from_entries(DEFAULT_LANGUAGE_PRIORITY).select(&tracks);
        assert_eq!(chosen.unwrap().language_code, "zh-Hans-en");
    }

    #[test]
    fn test_no_caption_keys_means_empty() {
        let dump = json!({"title": "Silent", "subtitles": {}, "automatic_captions": null});
        assert!(tracks_from_dump(&dump).is_empty());
        assert!(!video_info_from_dump("dQw4w9WgXcQ", &dump).has_captions);
    }

    #[test]
    fn test_parse_json3() {
        let body = r#"{"events": [
            {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "Hello "}, {"utf8": "world"}]},
            {"tStartMs": 1500, "dDurationMs": 500, "segs": [{"utf8": "\n"}]},
            {"tStartMs": 2000, "dDurationMs": 1000, "text": " plain "},
            {"tStartMs": 3000}
        ]}"#;

        let segments = parse_json3(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], CaptionSegment::new(0.0, 1.5, "Hello world"));
        assert_eq!(segments[1].text, "plain");
        assert_eq!(segments[1].start_seconds, 2.0);
    }
}
