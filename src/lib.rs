//! Video Captions - fetch captions for videos from Bilibili, YouTube and local files
//!
//! Platform caption APIs are preferred. When a video carries no caption track the
//! media is downloaded, its audio extracted, and the speech transcribed with Whisper.

pub mod backends;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod output;
pub mod pipeline;
pub mod tools;
pub mod transcribe;
pub mod utils;

use serde::Serialize;

pub use backends::{
    backend_name, select_backend, Backend, BackendContext, BackendKind, CaptionBackend,
    CaptionSegment, CaptionTrack, VideoInfo,
};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use credentials::{BrowserPreference, CredentialResolver, CredentialSource};
pub use pipeline::{AcquisitionFailure, AcquisitionResult, CaptionPipeline, Origin, PipelineOptions};
pub use transcribe::{ModelSize, SpeechRecognizer, Transcription};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error categories raised by backends and collaborators.
///
/// Internally everything travels as `anyhow::Error`; the orchestrator recovers
/// the category by searching the error chain for one of these.
#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    #[error("Unrecognized video reference: {0}")]
    InvalidReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Missing credential: {0}")]
    NoCredential(String),

    #[error("{tool} failed: {message}")]
    ExternalTool {
        tool: String,
        message: String,
        stderr: Option<String>,
    },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The platform answered but has no track for this video. Never surfaces
    /// to callers: the orchestrator switches to ASR instead.
    #[error("No caption track: {0}")]
    NoCaptionTrack(String),
}

impl CaptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptionError::InvalidReference(_) => ErrorKind::InvalidReference,
            CaptionError::NotFound(_) | CaptionError::NoCaptionTrack(_) => ErrorKind::NotFound,
            CaptionError::Upstream(_) => ErrorKind::UpstreamError,
            CaptionError::NoCredential(_) => ErrorKind::NoCredential,
            CaptionError::ExternalTool { .. } => ErrorKind::ExternalToolFailure,
            CaptionError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        }
    }

    /// Raw collaborator output kept for diagnostics
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            CaptionError::ExternalTool { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}

/// Failure category reported in a failed `AcquisitionResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidReference,
    NotFound,
    UpstreamError,
    NoCredential,
    ExternalToolFailure,
    UnsupportedFormat,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidReference => "InvalidReference",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::UpstreamError => "UpstreamError",
            ErrorKind::NoCredential => "NoCredential",
            ErrorKind::ExternalToolFailure => "ExternalToolFailure",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
        }
    }

    /// Categorize an arbitrary error by inspecting its chain
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(caption_err) = find_caption_error(err) {
            return caption_err.kind();
        }

        for cause in err.chain() {
            if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
                return match http_err.status() {
                    Some(reqwest::StatusCode::NOT_FOUND) => ErrorKind::NotFound,
                    _ => ErrorKind::UpstreamError,
                };
            }
            if cause.is::<serde_json::Error>() {
                return ErrorKind::UpstreamError;
            }
            if cause.is::<std::io::Error>() {
                return ErrorKind::ExternalToolFailure;
            }
        }

        ErrorKind::UpstreamError
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First `CaptionError` anywhere in the chain, context layers included
pub fn find_caption_error(err: &anyhow::Error) -> Option<&CaptionError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CaptionError>())
}

/// Fetch captions for `source` with configuration loaded from disk.
///
/// Never fails: every problem is reported through the failure variant.
pub async fn acquire_captions(
    source: &str,
    format: OutputFormat,
    model_size: &str,
    browser_preference: &str,
) -> AcquisitionResult {
    let config = Config::load_or_default().await;

    let browser = match browser_preference.parse::<BrowserPreference>() {
        Ok(browser) => browser,
        Err(e) => return AcquisitionFailure::from_error(&e).into(),
    };

    let options = PipelineOptions {
        browser,
        ..PipelineOptions::from_config(&config)
    };

    CaptionPipeline::new(config, options)
        .acquire_captions(source, format, model_size)
        .await
}
