use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tokio::sync::OnceCell;
use url::Url;

use super::{BackendContext, CaptionBackend, CaptionSegment, CaptionTrack, LanguagePolicy, MediaFile, VideoInfo};
use crate::credentials::CredentialResolver;
use crate::tools::YtDlp;
use crate::utils::media_file_name;
use crate::{CaptionError, Result};

pub const NAME: &str = "bilibili";

pub const API_BASE_URL: &str = "https://api.bilibili.com";

pub const DEFAULT_LANGUAGE_PRIORITY: &[&str] = &["ai-zh", "zh-Hans", "zh-CN", "zh", "zh*", "en"];

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn source_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)bilibili\.com/video/").expect("valid regex"),
            Regex::new(r"(?i)bilibili\.com/list/").expect("valid regex"),
            Regex::new(r"^BV\w+$").expect("valid regex"),
        ]
    })
}

fn bvid_pattern() -> &'static Regex {
    static BVID: OnceLock<Regex> = OnceLock::new();
    BVID.get_or_init(|| Regex::new(r"^BV\w+$").expect("valid regex"))
}

/// Whether `source` looks like a Bilibili video reference
pub fn is_bilibili_source(source: &str) -> bool {
    let source = source.trim();
    source_patterns().iter().any(|re| re.is_match(source))
}

/// BV id from a video URL, a `bvid=` query or a bare id
pub fn extract_bvid(source: &str) -> Result<String> {
    let source = source.trim();

    if bvid_pattern().is_match(source) {
        return Ok(source.to_string());
    }

    if let Some((_, rest)) = source.split_once("/video/") {
        let id = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    if let Ok(url) = Url::parse(source) {
        if let Some((_, bvid)) = url
            .query_pairs()
            .find(|(key, _)| key.eq_ignore_ascii_case("bvid"))
        {
            if !bvid.is_empty() {
                return Ok(bvid.into_owned());
            }
        }
    }

    let last = source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.split(&['?', '#'][..]).next())
        .unwrap_or_default();
    if last.starts_with("BV") {
        return Ok(last.to_string());
    }

    Err(CaptionError::InvalidReference(format!("no BV id in '{}'", source)).into())
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    desc: String,
    owner: Option<Owner>,
    cid: u64,
    subtitle: Option<ViewSubtitle>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ViewSubtitle {
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    subtitle: Option<PlayerSubtitle>,
}

#[derive(Debug, Deserialize)]
struct PlayerSubtitle {
    #[serde(default)]
    subtitles: Vec<PlayerTrack>,
}

#[derive(Debug, Deserialize)]
struct PlayerTrack {
    lan: String,
    #[serde(default)]
    lan_doc: String,
    #[serde(default)]
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleLine>,
}

#[derive(Debug, Deserialize)]
struct SubtitleLine {
    #[serde(default)]
    from: f64,
    #[serde(default)]
    to: f64,
    #[serde(default)]
    content: String,
}

/// Video info plus the page cid needed by the player API
#[derive(Debug, Clone)]
pub struct VideoView {
    pub info: VideoInfo,
    pub cid: u64,
}

/// Error category for a non-zero Bilibili API code
pub fn api_error(code: i64, message: &str) -> CaptionError {
    match code {
        -404 | 62002 | 62004 | 62012 => {
            CaptionError::NotFound(format!("Bilibili video unavailable ({}): {}", code, message))
        }
        -101 => CaptionError::NoCredential(format!(
            "Bilibili rejected the SESSDATA cookie ({}): {}. Log in again and retry",
            code, message
        )),
        _ => CaptionError::Upstream(format!("Bilibili API error {}: {}", code, message)),
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str, what: &str) -> Result<ApiEnvelope<T>> {
    let envelope = serde_json::from_str(body).with_context(|| format!("malformed {} response", what))?;
    Ok(envelope)
}

pub fn parse_view(body: &str) -> Result<VideoView> {
    let envelope: ApiEnvelope<ViewData> = parse_envelope(body, "video info")?;
    if envelope.code != 0 {
        return Err(api_error(envelope.code, &envelope.message).into());
    }
    let data = envelope
        .data
        .ok_or_else(|| CaptionError::Upstream("video info response has no data".to_string()))?;

    Ok(VideoView {
        cid: data.cid,
        info: VideoInfo {
            has_captions: data.subtitle.is_some_and(|s| !s.list.is_empty()),
            title: data.title,
            id: data.bvid,
            duration_seconds: data.duration,
            description: data.desc,
            author: data.owner.map(|o| o.name),
        },
    })
}

/// Caption tracks from a player response; a non-zero code means none
pub fn parse_player(body: &str) -> Result<Vec<CaptionTrack>> {
    let envelope: ApiEnvelope<PlayerData> = parse_envelope(body, "player")?;
    if envelope.code != 0 {
        return Err(CaptionError::NoCaptionTrack(format!(
            "player API returned {}: {}",
            envelope.code, envelope.message
        ))
        .into());
    }

    let tracks = envelope
        .data
        .and_then(|d| d.subtitle)
        .map(|s| s.subtitles)
        .unwrap_or_default()
        .into_iter()
        .map(|t| CaptionTrack {
            language_label: if t.lan_doc.is_empty() { t.lan.clone() } else { t.lan_doc },
            language_code: t.lan,
            fetch_url: Some(t.subtitle_url)
                .filter(|u| !u.is_empty())
                .map(|u| normalize_subtitle_url(&u)),
        })
        .collect();

    Ok(tracks)
}

/// Protocol-relative subtitle URLs get an `https:` scheme
pub fn normalize_subtitle_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else if !url.starts_with("http") {
        format!("https://{}", url.trim_start_matches('/'))
    } else {
        url.to_string()
    }
}

pub fn parse_subtitle_body(body: &str) -> Result<Vec<CaptionSegment>> {
    let parsed: SubtitleBody = serde_json::from_str(body).context("malformed subtitle body")?;
    Ok(parsed
        .body
        .into_iter()
        .map(|line| CaptionSegment::new(line.from, line.to, line.content))
        .collect())
}

/// Bilibili web API backend
pub struct BilibiliBackend {
    http: reqwest::Client,
    api_base: String,
    credentials: CredentialResolver,
    sessdata: OnceCell<String>,
    views: Mutex<HashMap<String, VideoView>>,
    policy: LanguagePolicy,
    ytdlp: YtDlp,
}

impl BilibiliBackend {
    pub fn from_context(ctx: &BackendContext) -> Self {
        Self {
            http: ctx.http.clone(),
            api_base: ctx.config.bilibili.api_base.trim_end_matches('/').to_string(),
            credentials: ctx.credentials.clone(),
            sessdata: OnceCell::new(),
            views: Mutex::new(HashMap::new()),
            policy: LanguagePolicy::from_entries(&ctx.config.bilibili.language_priority),
            ytdlp: YtDlp::new(&ctx.config.tools.yt_dlp, ctx.browser.named())
                .with_progress(ctx.show_progress),
        }
    }

    /// SESSDATA, resolved once per backend instance
    async fn sessdata(&self) -> Result<&str> {
        let token = self
            .sessdata
            .get_or_try_init(|| async {
                let resolver = self.credentials.clone();
                let credential = tokio::task::spawn_blocking(move || resolver.require()).await??;
                tracing::debug!("Bilibili credential source: {}", credential.source);
                Ok::<_, anyhow::Error>(credential.token)
            })
            .await?;
        Ok(token.as_str())
    }

    async fn api_get(&self, url: &str, referer: &str) -> Result<String> {
        let sessdata = self.sessdata().await?;

        tracing::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, referer)
            .header(COOKIE, format!("SESSDATA={}", sessdata))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }

    async fn view(&self, source: &str) -> Result<VideoView> {
        let bvid = extract_bvid(source)?;

        if let Some(view) = self.views.lock().ok().and_then(|views| views.get(&bvid).cloned()) {
            return Ok(view);
        }

        let url = format!("{}/x/web-interface/view?bvid={}", self.api_base, bvid);
        let body = self.api_get(&url, "https://www.bilibili.com/").await?;
        let view = parse_view(&body)?;

        if let Ok(mut views) = self.views.lock() {
            views.insert(bvid, view.clone());
        }
        Ok(view)
    }
}

#[async_trait]
impl CaptionBackend for BilibiliBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self, source: &str) -> bool {
        is_bilibili_source(source)
    }

    fn language_policy(&self) -> &LanguagePolicy {
        &self.policy
    }

    async fn fetch_metadata(&self, source: &str) -> Result<VideoInfo> {
        Ok(self.view(source).await?.info)
    }

    async fn list_captions(&self, source: &str) -> Result<Vec<CaptionTrack>> {
        let view = self.view(source).await?;
        let bvid = &view.info.id;

        let url = format!("{}/x/player/wbi/v2?bvid={}&cid={}", self.api_base, bvid, view.cid);
        let referer = format!("https://www.bilibili.com/video/{}", bvid);
        let body = self.api_get(&url, &referer).await?;

        let tracks = parse_player(&body)?;
        tracing::debug!("{} caption tracks for {}", tracks.len(), bvid);
        Ok(tracks)
    }

    async fn fetch_caption_track(&self, _source: &str, track: &CaptionTrack) -> Result<Vec<CaptionSegment>> {
        let url = track.fetch_url.as_deref().ok_or_else(|| {
            CaptionError::NotFound(format!("caption track '{}' has no subtitle URL", track.language_code))
        })?;

        let body = self
            .http
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let segments = parse_subtitle_body(&body)?;
        tracing::info!("Fetched {} captions ({})", segments.len(), track.language_code);
        Ok(segments)
    }

    async fn prepare_media(&self, source: &str, work_dir: &Path) -> Result<MediaFile> {
        let info = self.fetch_metadata(source).await?;
        let output = work_dir.join(media_file_name(&info.title, &info.id));
        let video_url = format!("https://www.bilibili.com/video/{}", info.id);

        let path = self.ytdlp.download(&video_url, &output).await?;

        Ok(MediaFile {
            path,
            title: info.title,
            cache_key: format!("bilibili-{}", info.id),
            id: info.id,
            needs_extraction: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{BrowserHint, BrowserPreference};
    use crate::ErrorKind;

    const VIEW_OK: &str = r#"{
        "code": 0, "message": "0",
        "data": {
            "bvid": "BV1xx411c7mD", "title": "字幕测试", "duration": 125,
            "desc": "demo", "owner": {"name": "up主"}, "cid": 62131,
            "subtitle": {"allow_submit": false, "list": [{"lan": "ai-zh"}]}
        }
    }"#;

    #[test]
    fn test_extract_bvid_forms() {
        for source in [
            "BV1xx411c7mD",
            "https://www.bilibili.com/video/BV1xx411c7mD",
            "https://www.bilibili.com/video/BV1xx411c7mD/?p=2&spm_id_from=333",
            "https://www.bilibili.com/list/watchlater?bvid=BV1xx411c7mD&oid=1",
            "https://m.example.com/share/BV1xx411c7mD?from=app",
        ] {
            assert_eq!(extract_bvid(source).unwrap(), "BV1xx411c7mD", "{}", source);
        }

        let err = extract_bvid("https://www.bilibili.com/").unwrap_err();
        assert_eq!(ErrorKind::classify(&err), ErrorKind::InvalidReference);
    }

    #[test]
    fn test_is_bilibili_source() {
        assert!(is_bilibili_source("https://www.BILIBILI.com/video/BV1xx411c7mD"));
        assert!(is_bilibili_source("https://www.bilibili.com/list/watchlater?bvid=BV1x"));
        assert!(is_bilibili_source("BV1xx411c7mD"));
        assert!(!is_bilibili_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_bilibili_source("bv1xx411c7mD"));
    }

    #[test]
    fn test_parse_view() {
        let view = parse_view(VIEW_OK).unwrap();
        assert_eq!(view.cid, 62131);
        assert_eq!(view.info.title, "字幕测试");
        assert_eq!(view.info.duration_seconds, 125);
        assert_eq!(view.info.author.as_deref(), Some("up主"));
        assert!(view.info.has_captions);
    }

    #[test]
    fn test_api_codes_map_to_error_kinds() {
        let cases = [
            (-404, ErrorKind::NotFound),
            (62002, ErrorKind::NotFound),
            (62004, ErrorKind::NotFound),
            (62012, ErrorKind::NotFound),
            (-101, ErrorKind::NoCredential),
            (-412, ErrorKind::UpstreamError),
        ];
        for (code, kind) in cases {
            let body = format!(r#"{{"code": {}, "message": "err", "data": null}}"#, code);
            let err = parse_view(&body).unwrap_err();
            assert_eq!(ErrorKind::classify(&err), kind, "code {}", code);
        }

        let err = parse_view("<html>").unwrap_err();
        assert_eq!(ErrorKind::classify(&err), ErrorKind::UpstreamError);
    }

    #[test]
    fn test_parse_player_tracks() {
        let body = r#"{"code": 0, "data": {"subtitle": {"subtitles": [
            {"lan": "ai-zh", "lan_doc": "中文（自动生成）", "subtitle_url": "//aisubtitle.hdslb.com/bfs/ai_subtitle/x.json"},
            {"lan": "en", "lan_doc": "", "subtitle_url": ""}
        ]}}}"#;

        let tracks = parse_player(body).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].language_label, "中文（自动生成）");
        assert_eq!(
            tracks[0].fetch_url.as_deref(),
            Some("https://aisubtitle.hdslb.com/bfs/ai_subtitle/x.json")
        );
        assert_eq!(tracks[1].language_label, "en");
        assert_eq!(tracks[1].fetch_url, None);

        let empty = parse_player(r#"{"code": 0, "data": {"subtitle": {"subtitles": []}}}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_player_error_code_means_no_track() {
        let err = parse_player(r#"{"code": -400, "message": "bad cid"}"#).unwrap_err();
        assert!(matches!(
            crate::find_caption_error(&err),
            Some(CaptionError::NoCaptionTrack(_))
        ));
    }

    #[test]
    fn test_parse_subtitle_body() {
        let body = r#"{"font_size": 0.4, "body": [
            {"from": 0.5, "to": 2.25, "location": 2, "content": "第一句"},
            {"from": 2.25, "to": 4.0, "content": "第二句"}
        ]}"#;
        let segments = parse_subtitle_body(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], CaptionSegment::new(0.5, 2.25, "第一句"));
        assert_eq!(segments[1].end_seconds, 4.0);
    }

    #[test]
    fn test_normalize_subtitle_url() {
        assert_eq!(normalize_subtitle_url("//a.b/c.json"), "https://a.b/c.json");
        assert_eq!(normalize_subtitle_url("https://a.b/c.json"), "https://a.b/c.json");
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_request() {
        let ctx = BackendContext::new(
            Config::default(),
            CredentialResolver::from_providers(Vec::new(), BrowserHint::new()),
            BrowserPreference::Disabled,
        );
        let backend = BilibiliBackend::from_context(&ctx);

        let err = backend.list_captions("BV1xx411c7mD").await.unwrap_err();
        assert_eq!(ErrorKind::classify(&err), ErrorKind::NoCredential);
    }
}
