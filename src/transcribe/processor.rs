use anyhow::{Context, Result};
use serde::Deserialize;

use crate::backends::CaptionSegment;

/// whisper.cpp `-oj` output
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    result: Option<WhisperResult>,
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: Offsets,
    #[serde(default)]
    text: String,
}

/// Milliseconds from the start of the audio
#[derive(Debug, Deserialize)]
struct Offsets {
    from: u64,
    to: u64,
}

/// Segments and detected language from whisper.cpp JSON.
///
/// Text is trimmed and empty segments are dropped.
pub fn parse_whisper_json(body: &str) -> Result<(Vec<CaptionSegment>, Option<String>)> {
    let output: WhisperOutput = serde_json::from_str(body).context("malformed Whisper output")?;

    let segments = output
        .transcription
        .into_iter()
        .filter_map(|segment| {
            let text = segment.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(CaptionSegment::new(
                segment.offsets.from as f64 / 1000.0,
                segment.offsets.to as f64 / 1000.0,
                text,
            ))
        })
        .collect();

    let language = output.result.and_then(|r| r.language);
    Ok((segments, language))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whisper_json() {
        let body = r#"{
            "systeminfo": "AVX = 1",
            "model": {"type": "large"},
            "result": {"language": "zh"},
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,480"},
                 "offsets": {"from": 0, "to": 2480}, "text": " 大家好"},
                {"timestamps": {"from": "00:00:02,480", "to": "00:00:03,000"},
                 "offsets": {"from": 2480, "to": 3000}, "text": "   "},
                {"timestamps": {"from": "00:00:03,000", "to": "00:00:05,120"},
                 "offsets": {"from": 3000, "to": 5120}, "text": "今天讲 Rust "}
            ]
        }"#;

        let (segments, language) = parse_whisper_json(body).unwrap();
        assert_eq!(language.as_deref(), Some("zh"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], CaptionSegment::new(0.0, 2.48, "大家好"));
        assert_eq!(segments[1].text, "今天讲 Rust");
        assert_eq!(segments[1].end_seconds, 5.12);
    }

    #[test]
    fn test_malformed_output_is_an_error() {
        assert!(parse_whisper_json("not json").is_err());
        let (segments, language) = parse_whisper_json("{}").unwrap();
        assert!(segments.is_empty());
        assert!(language.is_none());
    }
}
