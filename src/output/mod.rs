use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::backends::CaptionSegment;
use crate::cli::OutputFormat;

pub mod formatters;
pub mod script;

pub use formatters::*;
pub use script::{normalize, Passthrough, ScriptConverter, SimplifiedChinese};

/// Where the captions came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A caption track published on the platform
    PlatformApi,
    /// Transcribed from the audio
    Asr,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::PlatformApi => f.write_str("platform captions"),
            Origin::Asr => f.write_str("speech recognition"),
        }
    }
}

/// Rendered captions: a text blob, or cues for JSON output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptionBody {
    Content { content: String },
    Subtitles { subtitles: Vec<JsonCue> },
}

/// Captions rendered in the requested format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionDocument {
    pub origin: Origin,
    pub platform: String,
    pub format: OutputFormat,
    pub video_title: String,
    pub subtitle_count: usize,
    #[serde(flatten)]
    pub body: CaptionBody,
}

impl CaptionDocument {
    /// The rendered captions as printable text
    pub fn rendered(&self) -> Result<String> {
        match &self.body {
            CaptionBody::Content { content } => Ok(content.clone()),
            CaptionBody::Subtitles { subtitles } => Ok(serde_json::to_string_pretty(subtitles)?),
        }
    }
}

/// Turns segments into a [`CaptionDocument`], normalizing Han script
pub struct Renderer {
    converter: Box<dyn ScriptConverter>,
}

impl Renderer {
    pub fn new(converter: Box<dyn ScriptConverter>) -> Self {
        Self { converter }
    }

    pub fn render(
        &self,
        segments: &[CaptionSegment],
        title: &str,
        format: OutputFormat,
        origin: Origin,
        platform: &str,
    ) -> CaptionDocument {
        let converter = self.converter.as_ref();

        let body = match format {
            OutputFormat::Text => CaptionBody::Content {
                content: normalize(converter, &format_as_text(segments)),
            },
            OutputFormat::Srt => CaptionBody::Content {
                content: normalize(converter, &format_as_srt(segments)),
            },
            OutputFormat::Json => CaptionBody::Subtitles {
                subtitles: format_as_json(segments)
                    .into_iter()
                    .map(|cue| JsonCue {
                        content: normalize(converter, &cue.content),
                        ..cue
                    })
                    .collect(),
            },
        };

        CaptionDocument {
            origin,
            platform: platform.to_string(),
            format,
            video_title: title.to_string(),
            subtitle_count: segments.len(),
            body,
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Box::new(SimplifiedChinese))
    }
}

/// Save rendered captions to file
pub fn save_to_file(document: &CaptionDocument, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, document.rendered()?)?;
    Ok(())
}

/// Print rendered captions to console
pub fn print_to_console(document: &CaptionDocument) -> Result<()> {
    println!("{}", document.rendered()?);
    Ok(())
}
