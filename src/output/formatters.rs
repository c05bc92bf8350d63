use serde::{Deserialize, Serialize};

use crate::backends::CaptionSegment;
use crate::utils::truncate_chars;

/// Longest text output, in characters
pub const CHARACTER_LIMIT: usize = 50_000;

/// Appended when text output is cut at [`CHARACTER_LIMIT`]
pub const TRUNCATION_MARKER: &str = "\n\n... (content truncated)";

/// One entry of JSON output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonCue {
    pub from: f64,
    pub to: f64,
    pub content: String,
}

/// Segment texts joined by newlines, truncated at [`CHARACTER_LIMIT`]
pub fn format_as_text(segments: &[CaptionSegment]) -> String {
    let joined = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    match truncate_chars(&joined, CHARACTER_LIMIT) {
        (kept, true) => format!("{}{}", kept, TRUNCATION_MARKER),
        (_, false) => joined,
    }
}

/// Numbered SRT blocks, each followed by a blank line
pub fn format_as_srt(segments: &[CaptionSegment]) -> String {
    let mut output = String::new();

    for (index, segment) in segments.iter().enumerate() {
        output.push_str(&format!("{}\n", index + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_timestamp(segment.start_seconds),
            format_srt_timestamp(segment.end_seconds)
        ));
        output.push_str(&segment.text);
        output.push_str("\n\n");
    }

    output
}

/// Formats seconds as SRT timestamp (00:00:00,000)
pub fn format_srt_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0).floor() as u64;
    let minutes = ((seconds % 3600.0) / 60.0).floor() as u64;
    let secs = seconds % 60.0;

    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs).replace('.', ",")
}

pub fn format_as_json(segments: &[CaptionSegment]) -> Vec<JsonCue> {
    segments
        .iter()
        .map(|s| JsonCue {
            from: s.start_seconds,
            to: s.end_seconds,
            content: s.text.clone(),
        })
        .collect()
}
