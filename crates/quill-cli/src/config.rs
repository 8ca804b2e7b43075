//! Configuration file support

use quill_agent::{CheckpointMode, CompactionConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Model used when neither the command line nor the config names one
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Model used for compaction summaries by default
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";

const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for quill
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// OpenAI API key (alternative to the OPENAI_API_KEY environment variable)
    pub api_key: Option<String>,
    /// OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Maximum tokens per reply
    pub max_tokens: Option<u32>,
    /// Where conversations are stored
    pub data_dir: Option<PathBuf>,
    /// How conversation history is checkpointed (git, log, off)
    pub checkpoints: CheckpointMode,
    /// Retries for failed requests
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub compaction: CompactionSettings,
}

/// Compaction settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    pub enabled: Option<bool>,
    pub threshold: Option<u32>,
    pub keep_recent: Option<usize>,
    pub summary_model: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("QUILL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Store an API key, keeping the rest of the file
    pub fn set_api_key(key: &str) -> std::io::Result<PathBuf> {
        let mut config = Self::load();
        config.api_key = Some(key.to_string());
        config.save()?;
        Ok(Self::config_path())
    }

    /// API key from config, falling back to the environment
    pub fn api_key(&self) -> Option<String> {
        quill_ai::providers::get_api_key(self.api_key.as_deref(), API_KEY_ENV).ok()
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Directory holding conversation files
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quill")
                .join("conversations")
        })
    }

    pub fn compaction_config(&self) -> CompactionConfig {
        let defaults = CompactionConfig::default();
        let settings = &self.compaction;
        CompactionConfig {
            enabled: settings.enabled.unwrap_or(defaults.enabled),
            threshold: settings.threshold.unwrap_or(defaults.threshold),
            keep_recent: settings.keep_recent.unwrap_or(defaults.keep_recent),
            summary_model: Some(
                settings
                    .summary_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            ),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            ..defaults
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# quill configuration file
# Place at ~/.config/quill/config.toml (Linux), ~/Library/Application Support/quill/config.toml (Mac)
# or %APPDATA%\quill\config.toml (Windows). Override with QUILL_CONFIG_PATH.

# Default model to use
model = "gpt-4o"

# OpenAI-compatible endpoint (optional)
# base_url = "https://api.openai.com/v1"

# Maximum tokens per reply (optional)
# max_tokens = 4096

# Where conversations are stored (optional)
# data_dir = "~/.local/share/quill/conversations"

# How each save is checkpointed: "git" (commit per save), "log" (append-only
# <id>.history.jsonl), or "off"
checkpoints = "git"

# Retries for rate limits and server errors
max_retries = 3

# API key (optional - OPENAI_API_KEY is used when unset)
# api_key = "sk-..."

[compaction]
enabled = true
# Estimated tokens at which older turns are summarized
threshold = 3000
# Most recent turns always kept verbatim
keep_recent = 6
summary_model = "gpt-4o-mini"
"#
}
