use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration for command execution and supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Explicit ffmpeg binary; looked up on PATH when unset
    pub ffmpeg_bin: Option<PathBuf>,
    /// Explicit ffprobe binary; looked up on PATH when unset
    pub ffprobe_bin: Option<PathBuf>,
    /// Interval between polls while waiting for a process
    pub poll_interval_ms: u64,
    /// Interval between resource samples of a monitored process
    pub sample_interval_ms: u64,
    /// Upper bound on joining the sampler thread after terminate/kill
    pub join_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ChainConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: None,
            ffprobe_bin: None,
            poll_interval_ms: 100,
            sample_interval_ms: 100,
            join_timeout_ms: 1000,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
