//! Configuration management for framepump
//!
//! Loads engine settings from a TOML file under the platform config
//! directory, falling back to built-in defaults when the file is missing
//! or malformed. Config errors are never fatal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback engine configuration
    pub playback: PlaybackConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Playback engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Poll interval for would-block decoder retries, in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound on how long a caller-facing stop() waits for the
    /// control thread to acknowledge, in milliseconds
    pub stop_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            stop_timeout_ms: 50,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from disk, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_file_path();
        match std::fs::read_to_string(&path) {
            Ok(data) => match toml::from_str::<Config>(&data) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring malformed config {:?}: {}", path, e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_file_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, data)
    }

    fn config_file_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("framepump");
        path.push("config.toml");
        path
    }
}
