//! Configuration management
//!
//! Loaded from `config.toml` in the platform config directory. Every field
//! has a default, so a partial file is fine.

use crate::recorder::CaptureOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// How often the encoder flushes a chunk (ms)
    #[serde(default = "default_chunk_interval")]
    pub chunk_interval_ms: u64,

    /// How often elapsed-time ticks are emitted (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Artifact name prefix
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    /// Container file extension
    #[serde(default = "default_container_extension")]
    pub container_extension: String,

    /// Encoder MIME types to try, in order of preference
    #[serde(default = "default_mime_candidates")]
    pub mime_candidates: Vec<String>,

    /// Smallest accepted crop side
    #[serde(default = "default_min_crop_size")]
    pub min_crop_size: f64,

    /// Default destination for finished recordings
    pub output_directory: Option<PathBuf>,

    /// Where remembered device choices are kept
    #[serde(default = "default_preferences_path")]
    pub preferences_path: Option<PathBuf>,

    /// Capture options used when the caller gives none
    #[serde(default)]
    pub defaults: CaptureOptions,

    /// Path to config file (not serialized)
    #[serde(skip)]
    pub(crate) config_path: Option<PathBuf>,
}

fn default_chunk_interval() -> u64 {
    800
}

fn default_tick_interval() -> u64 {
    200 // ~5 Hz
}

fn default_artifact_prefix() -> String {
    "Recording".to_string()
}

fn default_container_extension() -> String {
    "webm".to_string()
}

fn default_mime_candidates() -> Vec<String> {
    [
        "video/webm;codecs=vp9,opus",
        "video/webm;codecs=vp8,opus",
        "video/webm;codecs=vp9",
        "video/webm;codecs=vp8",
        "video/webm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_min_crop_size() -> f64 {
    crate::compositor::MIN_CROP_SIZE
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "crafter-station", "screen-scheduler")
}

fn default_preferences_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("preferences.json"))
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: default_chunk_interval(),
            tick_interval_ms: default_tick_interval(),
            artifact_prefix: default_artifact_prefix(),
            container_extension: default_container_extension(),
            mime_candidates: default_mime_candidates(),
            min_crop_size: default_min_crop_size(),
            output_directory: None,
            preferences_path: default_preferences_path(),
            defaults: CaptureOptions::default(),
            config_path: None,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = RecorderConfig::default();
            config.config_path = Some(config_path.clone());
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: RecorderConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the file it was loaded from, or the default location
    pub fn save(&self) -> Result<()> {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::default_config_path()?,
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn default_config_path() -> Result<PathBuf> {
        let dirs = project_dirs().context("Failed to determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
