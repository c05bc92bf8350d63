use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backends::{bilibili, youtube};
use crate::cli::OutputFormat;
use crate::credentials::BrowserPreference;
use crate::transcribe::ModelSize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Bilibili API settings
    pub bilibili: BilibiliConfig,

    /// YouTube settings
    pub youtube: YoutubeConfig,

    /// Speech recognition settings
    pub asr: AsrConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable
    pub yt_dlp: String,

    /// ffmpeg executable
    pub ffmpeg: String,

    /// whisper.cpp CLI executable
    pub whisper: String,

    /// Directory holding ggml-<size>.bin Whisper models
    pub models_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BilibiliConfig {
    /// API base URL
    pub api_base: String,

    /// Explicit SESSDATA cookie, highest priority when set
    pub sessdata: Option<String>,

    /// Caption language preference, `zh*` style entries match by prefix
    pub language_priority: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    /// Caption language preference, `zh*` style entries match by prefix
    pub language_priority: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Model used when the caller does not pick one
    pub default_model: String,

    /// Spoken language hint passed to Whisper ("auto" to detect)
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Browser cookie source: auto, chrome, edge, brave, firefox, opera or none
    pub browser: String,

    /// Default output format
    pub default_format: OutputFormat,

    /// Persistent directory for downloaded media and extracted audio
    pub cache_dir: Option<PathBuf>,

    /// Show spinners while external tools run
    pub show_progress: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            whisper: "whisper-cli".to_string(),
            models_dir: None,
        }
    }
}

impl Default for BilibiliConfig {
    fn default() -> Self {
        Self {
            api_base: bilibili::API_BASE_URL.to_string(),
            sessdata: None,
            language_priority: bilibili::DEFAULT_LANGUAGE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            language_priority: youtube::DEFAULT_LANGUAGE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            default_model: "large".to_string(),
            language: "zh".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            browser: "auto".to_string(),
            default_format: OutputFormat::Text,
            cache_dir: None,
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from file, or defaults when no file exists
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            tracing::debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Like [`Config::load`], but an unreadable file only costs a warning
    pub async fn load_or_default() -> Self {
        match Self::load().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Falling back to default configuration: {:#}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("video-captions").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let api_base = url::Url::parse(&self.bilibili.api_base)
            .with_context(|| format!("Invalid bilibili.api_base: {}", self.bilibili.api_base))?;
        if !matches!(api_base.scheme(), "http" | "https") {
            anyhow::bail!("bilibili.api_base must use HTTP or HTTPS");
        }

        self.app
            .browser
            .parse::<BrowserPreference>()
            .context("Invalid app.browser")?;

        if ModelSize::from_name(&self.asr.default_model).is_none() {
            tracing::warn!(
                "Unknown asr.default_model '{}', '{}' will be used",
                self.asr.default_model,
                ModelSize::default()
            );
        }

        Ok(())
    }

    /// Directory holding Whisper models
    pub fn models_dir(&self) -> PathBuf {
        self.tools.models_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("video-captions")
                .join("models")
        })
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  yt-dlp: {}", self.tools.yt_dlp);
        println!("  ffmpeg: {}", self.tools.ffmpeg);
        println!("  whisper: {}", self.tools.whisper);
        println!("  Models Dir: {}", self.models_dir().display());
        println!("  Bilibili API: {}", self.bilibili.api_base);
        if let Some(sessdata) = &self.bilibili.sessdata {
            println!("  Bilibili SESSDATA: {}", crate::credentials::redact(sessdata));
        }
        println!("  Bilibili Languages: {}", self.bilibili.language_priority.join(", "));
        println!("  YouTube Languages: {}", self.youtube.language_priority.join(", "));
        println!("  ASR Model: {}", self.asr.default_model);
        println!("  ASR Language: {}", self.asr.language);
        println!("  Browser: {}", self.app.browser);
        println!("  Default Format: {}", self.app.default_format);
        if let Some(cache_dir) = &self.app.cache_dir {
            println!("  Cache Dir: {}", cache_dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "app:\n  browser: firefox\n  default_format: srt\nasr:\n  default_model: small\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.app.browser, "firefox");
        assert_eq!(config.app.default_format, OutputFormat::Srt);
        assert_eq!(config.asr.default_model, "small");
        assert_eq!(config.asr.language, "zh");
        assert_eq!(config.tools.yt_dlp, "yt-dlp");
        assert_eq!(config.bilibili.language_priority[0], "ai-zh");
    }

    #[test]
    fn test_validate_rejects_bad_api_base_and_browser() {
        let mut config = Config::default();
        config.bilibili.api_base = "ftp://api.bilibili.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.app.browser = "netscape".to_string();
        assert!(config.validate().is_err());
    }
}
