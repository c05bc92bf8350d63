use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "video-captions",
    about = "Video Captions - Fetch captions from Bilibili, YouTube and local media files",
    version,
    long_about = "Fetches captions through the platform's own caption API when one exists, and falls back to Whisper speech recognition when the video has no captions. Local audio/video files are always transcribed."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch captions for a video URL, BV id, or local file
    Fetch {
        /// Bilibili/YouTube URL, BV id, or local audio/video file
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Whisper model size used when falling back to ASR (base, small, medium, large)
        #[arg(short, long, value_name = "SIZE")]
        model: Option<String>,

        /// Browser to read cookies from (auto, chrome, edge, brave, firefox, opera, none)
        #[arg(long, value_name = "BROWSER")]
        browser: Option<String>,

        /// Bilibili SESSDATA cookie value (takes precedence over env and browser)
        #[arg(long, value_name = "TOKEN")]
        sessdata: Option<String>,

        /// Write captions to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Directory kept between runs for downloaded media and extracted audio
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Print the whole result object as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Show video metadata
    Info {
        #[arg(value_name = "SOURCE")]
        source: String,

        #[arg(long, value_name = "BROWSER")]
        browser: Option<String>,

        #[arg(long, value_name = "TOKEN")]
        sessdata: Option<String>,
    },

    /// List caption tracks offered by the platform
    List {
        #[arg(value_name = "SOURCE")]
        source: String,

        #[arg(long, value_name = "BROWSER")]
        browser: Option<String>,

        #[arg(long, value_name = "TOKEN")]
        sessdata: Option<String>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },

    /// List supported platforms
    Platforms,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text
    Text,
    /// SRT subtitle format
    Srt,
    /// JSON with timestamps
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Srt => write!(f, "srt"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "srt" => Ok(OutputFormat::Srt),
            "json" => Ok(OutputFormat::Json),
            other => anyhow::bail!("Unknown output format '{}' (expected text, srt or json)", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("SRT".parse::<OutputFormat>().unwrap(), OutputFormat::Srt);
        assert_eq!("txt".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("vtt".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "video-captions",
            "fetch",
            "BV1xx411c7mD",
            "--format",
            "json",
            "--browser",
            "firefox",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch { source, format, browser, .. } => {
                assert_eq!(source, "BV1xx411c7mD");
                assert_eq!(format, Some(OutputFormat::Json));
                assert_eq!(browser.as_deref(), Some("firefox"));
            }
            _ => panic!("expected fetch"),
        }
    }
}
