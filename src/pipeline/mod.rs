//! Caption acquisition: platform captions first, speech recognition as fallback
//!
//! ```text
//! Start -> ListingCaptions -> HasCaptions -> Rendering -> Done
//!                          -> NoCaptions -> ExtractingAudio -> Transcribing -> Rendering -> Done
//!                          -> Failed
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::backends::{self, local, Backend, BackendContext, CaptionBackend, CaptionSegment, CaptionTrack, MediaFile, VideoInfo};
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::credentials::{BrowserHint, BrowserPreference, CredentialResolver};
use crate::output::Renderer;
use crate::tools::{audio_path_for, AudioExtractor, FfmpegExtractor};
use crate::transcribe::{ModelSize, SpeechRecognizer, WhisperCli};
use crate::{find_caption_error, CaptionError, ErrorKind, Result};

pub use crate::output::{CaptionBody, CaptionDocument, Origin};

/// Outcome of one acquisition, serialized with a `status` tag
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquisitionResult {
    Success(CaptionDocument),
    Failure(AcquisitionFailure),
}

impl AcquisitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AcquisitionResult::Success(_))
    }
}

impl From<AcquisitionFailure> for AcquisitionResult {
    fn from(failure: AcquisitionFailure) -> Self {
        AcquisitionResult::Failure(failure)
    }
}

/// Why an acquisition failed and what the user can do about it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionFailure {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_diagnostic: Option<String>,
}

impl AcquisitionFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let error_kind = ErrorKind::classify(err);
        let raw_diagnostic = find_caption_error(err)
            .and_then(|e| e.diagnostic())
            .map(str::to_string);
        let message = format!("{:#}", err);

        let searched = match &raw_diagnostic {
            Some(diagnostic) => format!("{}\n{}", message, diagnostic),
            None => message.clone(),
        };

        Self {
            error_kind,
            suggestion: suggestion_for(error_kind, &searched),
            message,
            raw_diagnostic,
        }
    }
}

/// Remedy derived from the failure category and collaborator output
pub fn suggestion_for(kind: ErrorKind, diagnostic: &str) -> Option<String> {
    let lower = diagnostic.to_lowercase();

    let suggestion = match kind {
        ErrorKind::UnsupportedFormat => {
            format!("Supported file types: {}", local::supported_extensions())
        }
        ErrorKind::InvalidReference => {
            "Pass a Bilibili URL or BV id, a YouTube URL or video id, or a path to a local audio/video file"
                .to_string()
        }
        ErrorKind::NoCredential => credential_hint(),
        _ if lower.contains("sign in") || lower.contains("login") => credential_hint(),
        _ if lower.contains("429") || lower.contains("timed out") || lower.contains("temporarily") => {
            "The platform is throttling or temporarily unavailable; retry later".to_string()
        }
        ErrorKind::ExternalToolFailure if lower.contains("not found") || lower.contains("no such file") => {
            "Make sure yt-dlp, ffmpeg and whisper-cli are installed and on PATH".to_string()
        }
        ErrorKind::ExternalToolFailure if lower.contains("model missing") => {
            "Download the Whisper model or set tools.models_dir in config.yaml".to_string()
        }
        ErrorKind::ExternalToolFailure | ErrorKind::UpstreamError => {
            "Check your network connection and try again".to_string()
        }
        ErrorKind::NotFound => return None,
    };

    Some(suggestion)
}

fn credential_hint() -> String {
    format!(
        "Log in to the site in your browser (and pass --browser), or supply the cookie with --sessdata or {}",
        crate::credentials::SESSDATA_ENV
    )
}

fn is_no_caption_track(err: &anyhow::Error) -> bool {
    matches!(find_caption_error(err), Some(CaptionError::NoCaptionTrack(_)))
}

/// Per-run settings that override configuration
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub browser: BrowserPreference,
    pub explicit_credential: Option<String>,

    /// Keep downloads and extracted audio here instead of a scratch directory
    pub cache_dir: Option<PathBuf>,
    pub show_progress: bool,
    pub hint: BrowserHint,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        let browser = config.app.browser.parse().unwrap_or_else(|e| {
            warn!("Ignoring app.browser: {:#}", e);
            BrowserPreference::Auto
        });

        Self {
            browser,
            explicit_credential: config.bilibili.sessdata.clone(),
            cache_dir: config.app.cache_dir.clone(),
            show_progress: config.app.show_progress,
            hint: BrowserHint::new(),
        }
    }
}

/// Main caption acquisition pipeline
pub struct CaptionPipeline {
    config: Config,
    options: PipelineOptions,
    extractor: Arc<dyn AudioExtractor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    renderer: Renderer,
}

impl CaptionPipeline {
    /// Pipeline backed by ffmpeg and whisper.cpp
    pub fn new(config: Config, options: PipelineOptions) -> Self {
        let extractor = Arc::new(FfmpegExtractor::new(&config.tools.ffmpeg));
        let recognizer = Arc::new(WhisperCli::from_config(&config).with_progress(options.show_progress));
        Self::with_tools(config, options, extractor, recognizer)
    }

    pub fn with_tools(
        config: Config,
        options: PipelineOptions,
        extractor: Arc<dyn AudioExtractor>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            config,
            options,
            extractor,
            recognizer,
            renderer: Renderer::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn backend_context(&self) -> BackendContext {
        let resolver = CredentialResolver::new(
            self.options.explicit_credential.clone(),
            self.options.browser,
            self.options.hint.clone(),
        );
        let mut ctx = BackendContext::new(self.config.clone(), resolver, self.options.browser);
        ctx.show_progress = self.options.show_progress;
        ctx
    }

    /// Backend for `source`, or why none applies
    pub fn select_backend(&self, source: &str) -> Result<Backend> {
        if let Some(backend) = backends::select_backend(source, &self.backend_context()) {
            return Ok(backend);
        }

        if local::is_unsupported_file(source) {
            return Err(CaptionError::UnsupportedFormat(format!(
                "{} (supported: {})",
                source,
                local::supported_extensions()
            ))
            .into());
        }

        Err(CaptionError::InvalidReference(source.to_string()).into())
    }

    pub async fn video_info(&self, source: &str) -> Result<VideoInfo> {
        self.select_backend(source)?.fetch_metadata(source).await
    }

    pub async fn caption_tracks(&self, source: &str) -> Result<Vec<CaptionTrack>> {
        let backend = self.select_backend(source)?;
        match backend.list_captions(source).await {
            Err(e) if is_no_caption_track(&e) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Fetch captions for `source`; never fails, errors become a failure result
    pub async fn acquire_captions(&self, source: &str, format: OutputFormat, model_size: &str) -> AcquisitionResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("acquire", %request_id, backend = tracing::field::Empty);

        async {
            let backend = match self.select_backend(source) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!("Cannot handle source: {:#}", e);
                    return AcquisitionFailure::from_error(&e).into();
                }
            };
            tracing::Span::current().record("backend", backend.name());

            self.acquire_with(&*backend, source, format, model_size).await
        }
        .instrument(span)
        .await
    }

    /// Run the acquisition flow against a specific backend
    pub async fn acquire_with(
        &self,
        backend: &dyn CaptionBackend,
        source: &str,
        format: OutputFormat,
        model_size: &str,
    ) -> AcquisitionResult {
        let model = ModelSize::parse_or_default(model_size);

        match self.try_acquire(backend, source, format, model).await {
            Ok(document) => {
                info!(
                    "Acquired {} captions via {} for '{}'",
                    document.subtitle_count, document.origin, document.video_title
                );
                AcquisitionResult::Success(document)
            }
            Err(e) => {
                debug!(state = "failed", "{:#}", e);
                AcquisitionFailure::from_error(&e).into()
            }
        }
    }

    async fn try_acquire(
        &self,
        backend: &dyn CaptionBackend,
        source: &str,
        format: OutputFormat,
        model: ModelSize,
    ) -> Result<CaptionDocument> {
        if backend.offers_platform_captions() {
            debug!(state = "listing_captions");
            let tracks = match backend.list_captions(source).await {
                Ok(tracks) => tracks,
                Err(e) if is_no_caption_track(&e) => {
                    debug!("{:#}", e);
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            match backend.select_track(&tracks) {
                Some(track) => {
                    debug!(state = "has_captions", language = %track.language_code);
                    let segments = match backend.fetch_caption_track(source, track).await {
                        Ok(segments) => segments,
                        Err(e) if is_no_caption_track(&e) => Vec::new(),
                        Err(e) => return Err(e),
                    };

                    if !segments.is_empty() {
                        let info = backend.fetch_metadata(source).await?;
                        debug!(state = "rendering");
                        return Ok(self.renderer.render(
                            &segments,
                            &info.title,
                            format,
                            Origin::PlatformApi,
                            backend.name(),
                        ));
                    }
                    warn!(
                        "Caption track '{}' is empty, switching to speech recognition",
                        track.language_code
                    );
                }
                None => {
                    debug!(state = "no_captions");
                    warn!("No captions available, switching to speech recognition");
                }
            }
        }

        let (segments, title) = self.acquire_with_asr(backend, source, model).await?;
        debug!(state = "rendering");
        Ok(self
            .renderer
            .render(&segments, &title, format, Origin::Asr, backend.name()))
    }

    async fn acquire_with_asr(
        &self,
        backend: &dyn CaptionBackend,
        source: &str,
        model: ModelSize,
    ) -> Result<(Vec<CaptionSegment>, String)> {
        let (work_dir, _scratch) = match &self.options.cache_dir {
            Some(dir) => {
                fs_err::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let scratch = tempfile::Builder::new().prefix("video-captions-").tempdir()?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        debug!(state = "extracting_audio", work_dir = %work_dir.display());
        let media = backend.prepare_media(source, &work_dir).await?;
        let audio = self.ensure_audio(&media, &work_dir).await?;

        debug!(state = "transcribing", audio = %audio.display());
        let transcription = self.recognizer.transcribe(&audio, model).await?;
        info!(
            "Speech recognition produced {} segments ({}) in {:.1}s",
            transcription.segments.len(),
            transcription.language,
            transcription.elapsed.as_secs_f64()
        );

        Ok((transcription.segments, media.title))
    }

    /// Wav audio for `media`, reusing a previous extraction in `work_dir`
    async fn ensure_audio(&self, media: &MediaFile, work_dir: &Path) -> Result<PathBuf> {
        if !media.needs_extraction {
            return Ok(media.path.clone());
        }

        let target = audio_path_for(&media.cache_key, work_dir);
        if fs_err::metadata(&target).map(|m| m.len() > 0).unwrap_or(false) {
            info!("Reusing extracted audio: {}", target.display());
            return Ok(target);
        }

        self.extractor.extract_audio(&media.path, &target).await
    }
}
