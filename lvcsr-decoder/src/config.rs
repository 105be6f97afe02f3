//! Configuration management

use anyhow::{Context, Result};
use lvcsr_search::SearchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// JSON model bundle (HMMs, dictionary, LM reference)
    pub model_path: String,

    /// Result format written to stdout
    pub output: OutputFormat,

    /// Log level: error, warn, info, debug or trace
    pub log_level: String,

    /// Frames buffered between the reader and the streaming decoder
    pub stream_buffer: usize,

    /// Search parameters of both passes
    pub search: SearchConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            model_path: Self::default_model_path().to_string_lossy().into_owned(),
            output: OutputFormat::Text,
            log_level: "info".to_string(),
            stream_buffer: 64,
            search: SearchConfig::default(),
        }
    }
}

impl DecoderConfig {
    /// Load configuration from the default path, creating it when missing
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Self::default();
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: DecoderConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;

        config
            .search
            .validate()
            .context("Invalid search configuration")?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lvcsr")
            .join("config.toml")
    }

    fn default_model_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lvcsr")
            .join("model.json")
    }

    /// `log_level` as a tracing level, `info` when unrecognized
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
