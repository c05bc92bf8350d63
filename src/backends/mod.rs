use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::{Path, PathBuf};

pub mod bilibili;
pub mod local;
pub mod youtube;

pub use bilibili::BilibiliBackend;
pub use local::LocalFileBackend;
pub use youtube::YoutubeBackend;

use crate::config::Config;
use crate::credentials::{BrowserPreference, CredentialResolver};
use crate::Result;

/// Basic information about a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub id: String,
    pub duration_seconds: u64,
    pub description: String,
    pub author: Option<String>,
    pub has_captions: bool,
}

/// A caption track offered by a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrack {
    /// Platform language code such as `ai-zh`, `zh-Hans` or `en`
    pub language_code: String,

    /// Human readable language name
    pub language_label: String,

    /// Where the track body can be fetched, when the platform exposes it
    pub fetch_url: Option<String>,
}

/// One timed line of captions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl CaptionSegment {
    /// Negative starts are clamped to zero and ends never precede starts
    pub fn new(start_seconds: f64, end_seconds: f64, text: impl Into<String>) -> Self {
        let start_seconds = start_seconds.max(0.0);
        Self {
            start_seconds,
            end_seconds: end_seconds.max(start_seconds),
            text: text.into(),
        }
    }
}

/// Local media ready for the speech recognition path
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub title: String,
    pub id: String,

    /// Names extracted audio in the work directory; unique per source
    pub cache_key: String,

    /// False when the file is already wav audio
    pub needs_extraction: bool,
}

/// One entry of a language preference list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageRule {
    Exact(String),
    /// Written `zh*` in configuration
    Prefix(String),
}

impl LanguageRule {
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        match entry.strip_suffix('*') {
            Some(prefix) => LanguageRule::Prefix(prefix.to_string()),
            None => LanguageRule::Exact(entry.to_string()),
        }
    }

    pub fn matches(&self, language_code: &str) -> bool {
        match self {
            LanguageRule::Exact(code) => code.eq_ignore_ascii_case(language_code),
            LanguageRule::Prefix(prefix) => language_code
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase()),
        }
    }
}

/// Ordered language preference used to pick one track out of many.
///
/// The first rule that matches any track wins; without a match the first
/// track is used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LanguagePolicy {
    rules: Vec<LanguageRule>,
}

impl LanguagePolicy {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: entries
                .into_iter()
                .filter(|e| !e.as_ref().trim().is_empty())
                .map(|e| LanguageRule::parse(e.as_ref()))
                .collect(),
        }
    }

    pub fn rules(&self) -> &[LanguageRule] {
        &self.rules
    }

    pub fn select<'a>(&self, tracks: &'a [CaptionTrack]) -> Option<&'a CaptionTrack> {
        self.rules
            .iter()
            .find_map(|rule| tracks.iter().find(|t| rule.matches(&t.language_code)))
            .or_else(|| tracks.first())
    }
}

/// What every platform backend can do
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pattern check only, no network access
    fn is_applicable(&self, source: &str) -> bool;

    /// False for sources that can only be transcribed
    fn offers_platform_captions(&self) -> bool {
        true
    }

    fn language_policy(&self) -> &LanguagePolicy;

    async fn fetch_metadata(&self, source: &str) -> Result<VideoInfo>;

    /// Empty when the video has no captions
    async fn list_captions(&self, source: &str) -> Result<Vec<CaptionTrack>>;

    async fn fetch_caption_track(&self, source: &str, track: &CaptionTrack) -> Result<Vec<CaptionSegment>>;

    /// Download (or locate) the media for transcription
    async fn prepare_media(&self, source: &str, work_dir: &Path) -> Result<MediaFile>;

    fn select_track<'a>(&self, tracks: &'a [CaptionTrack]) -> Option<&'a CaptionTrack> {
        self.language_policy().select(tracks)
    }
}

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    LocalFile,
    Bilibili,
    YouTube,
}

impl BackendKind {
    /// Order in which sources are matched against backends
    pub const TRIAL_ORDER: [BackendKind; 3] = [
        BackendKind::LocalFile,
        BackendKind::Bilibili,
        BackendKind::YouTube,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::LocalFile => local::NAME,
            BackendKind::Bilibili => bilibili::NAME,
            BackendKind::YouTube => youtube::NAME,
        }
    }

    pub fn matches(&self, source: &str) -> bool {
        match self {
            BackendKind::LocalFile => local::is_local_media(source),
            BackendKind::Bilibili => bilibili::is_bilibili_source(source),
            BackendKind::YouTube => youtube::is_youtube_source(source),
        }
    }

    pub fn detect(source: &str) -> Option<Self> {
        Self::TRIAL_ORDER.into_iter().find(|kind| kind.matches(source))
    }

    /// One-line description for `platforms`
    pub fn description(&self) -> &'static str {
        match self {
            BackendKind::LocalFile => "local audio/video files (transcribed with Whisper)",
            BackendKind::Bilibili => "bilibili.com/video/BV..., bare BV ids (needs SESSDATA)",
            BackendKind::YouTube => "youtube.com/watch, youtu.be, shorts, embed, bare video ids",
        }
    }
}

/// Shared inputs for constructing backends
#[derive(Clone)]
pub struct BackendContext {
    pub config: Config,
    pub credentials: CredentialResolver,
    pub browser: BrowserPreference,
    pub show_progress: bool,
    pub http: reqwest::Client,
}

impl BackendContext {
    pub fn new(config: Config, credentials: CredentialResolver, browser: BrowserPreference) -> Self {
        let show_progress = config.app.show_progress;
        Self {
            config,
            credentials,
            browser,
            show_progress,
            http: reqwest::Client::new(),
        }
    }
}

/// A constructed backend for one request
pub enum Backend {
    LocalFile(LocalFileBackend),
    Bilibili(BilibiliBackend),
    YouTube(YoutubeBackend),
}

impl Backend {
    pub fn build(kind: BackendKind, ctx: &BackendContext) -> Self {
        match kind {
            BackendKind::LocalFile => Backend::LocalFile(LocalFileBackend::new()),
            BackendKind::Bilibili => Backend::Bilibili(BilibiliBackend::from_context(ctx)),
            BackendKind::YouTube => Backend::YouTube(YoutubeBackend::from_context(ctx)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::LocalFile(_) => BackendKind::LocalFile,
            Backend::Bilibili(_) => BackendKind::Bilibili,
            Backend::YouTube(_) => BackendKind::YouTube,
        }
    }
}

impl Deref for Backend {
    type Target = dyn CaptionBackend;

    fn deref(&self) -> &Self::Target {
        match self {
            Backend::LocalFile(b) => b,
            Backend::Bilibili(b) => b,
            Backend::YouTube(b) => b,
        }
    }
}

/// First backend in [`BackendKind::TRIAL_ORDER`] that accepts `source`
pub fn select_backend(source: &str, ctx: &BackendContext) -> Option<Backend> {
    BackendKind::detect(source).map(|kind| Backend::build(kind, ctx))
}

/// Name of the backend that would handle `source`
pub fn backend_name(source: &str) -> Option<&'static str> {
    BackendKind::detect(source).map(|kind| kind.name())
}
