use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::backends::CaptionSegment;
use crate::config::Config;
use crate::tools::{run_tool, truncate_stderr};
use crate::utils::spinner;
use crate::{CaptionError, Result};

pub mod processor;

/// Whisper model sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Base,
    Small,
    Medium,
    #[default]
    Large,
}

impl ModelSize {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "base" => Some(ModelSize::Base),
            "small" => Some(ModelSize::Small),
            "medium" => Some(ModelSize::Medium),
            "large" | "large-v2" | "large-v3" => Some(ModelSize::Large),
            _ => None,
        }
    }

    /// Unknown names fall back to the default size with a warning
    pub fn parse_or_default(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            tracing::warn!("Unknown model size '{}', using '{}'", name, ModelSize::default());
            ModelSize::default()
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }

    /// Model name inside `ggml-<name>.bin`
    pub fn ggml_name(&self) -> &'static str {
        match self {
            ModelSize::Large => "large-v3",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speech recognition output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub segments: Vec<CaptionSegment>,

    /// Language detected/used
    pub language: String,

    /// Wall time spent recognizing
    pub elapsed: Duration,

    /// Timestamp when transcription completed
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Turns audio into timed text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, audio: &Path, model: ModelSize) -> Result<Transcription>;
}

/// whisper.cpp command line recognizer
pub struct WhisperCli {
    program: String,
    models_dir: PathBuf,
    language: String,
    show_progress: bool,
}

impl WhisperCli {
    pub fn new(program: impl Into<String>, models_dir: PathBuf, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            models_dir,
            language: language.into(),
            show_progress: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.tools.whisper, config.models_dir(), &config.asr.language)
            .with_progress(config.app.show_progress)
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn model_path(&self, model: ModelSize) -> PathBuf {
        self.models_dir.join(format!("ggml-{}.bin", model.ggml_name()))
    }

    fn failure(&self, message: String, stderr: Option<String>) -> CaptionError {
        CaptionError::ExternalTool {
            tool: self.program.clone(),
            message,
            stderr,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperCli {
    async fn transcribe(&self, audio: &Path, model: ModelSize) -> Result<Transcription> {
        let model_path = self.model_path(model);
        if !model_path.is_file() {
            return Err(self
                .failure(
                    format!(
                        "Whisper model missing at {}; download ggml-{}.bin into {}",
                        model_path.display(),
                        model.ggml_name(),
                        self.models_dir.display()
                    ),
                    None,
                )
                .into());
        }

        let output_dir = tempfile::Builder::new().prefix("video-captions-whisper-").tempdir()?;
        let output_prefix = output_dir.path().join("transcript");
        let json_path = output_dir.path().join("transcript.json");

        tracing::info!("Transcribing {} with model {}", audio.display(), model);
        let started = Instant::now();
        let pb = spinner(format!("Transcribing with Whisper ({})", model), self.show_progress);

        let result = run_tool(
            &self.program,
            [
                OsStr::new("-m"),
                model_path.as_os_str(),
                OsStr::new("-f"),
                audio.as_os_str(),
                OsStr::new("-l"),
                OsStr::new(&self.language),
                OsStr::new("-oj"),
                OsStr::new("-of"),
                output_prefix.as_os_str(),
                OsStr::new("-np"),
            ],
        )
        .await;
        pb.finish_and_clear();
        let output = result?;

        if !output.status.success() {
            return Err(self
                .failure(
                    format!("transcription exited with {}", output.status),
                    Some(truncate_stderr(&output.stderr)),
                )
                .into());
        }

        let body = fs_err::read_to_string(&json_path)?;
        let (segments, detected) = processor::parse_whisper_json(&body)?;
        let elapsed = started.elapsed();

        tracing::info!("Transcribed {} segments in {:.1}s", segments.len(), elapsed.as_secs_f64());

        Ok(Transcription {
            segments,
            language: detected.unwrap_or_else(|| self.language.clone()),
            elapsed,
            completed_at: chrono::Utc::now(),
        })
    }
}
