//! Configuration management for med-reminder-rs.
//!
//! Loads config from YAML files in standard locations; every section falls
//! back to sensible defaults so the service runs with no config at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Reminder scan cadence in seconds. Must stay well under a minute so
    /// no minute bucket is skipped.
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub host: String,
    pub model: String,
    pub voice: String,
    /// Falls back to $GEMINI_API_KEY when empty.
    pub api_key: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            host: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Kore".into(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pause between speech replays while an alarm rings.
    pub loop_pause_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { loop_pause_ms: 1500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the records JSON file; defaults to ~/.med-reminder/records.json.
    pub records_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UI language, used when a record has no analysis language of its own.
    pub language: String,
    pub scheduler: SchedulerConfig,
    pub speech: SpeechConfig,
    pub playback: PlaybackConfig,
    pub feedback: FeedbackConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "en".into(),
            scheduler: SchedulerConfig::default(),
            speech: SpeechConfig::default(),
            playback: PlaybackConfig::default(),
            feedback: FeedbackConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/med-reminder/config.yaml
    /// 3. /etc/med-reminder/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/med-reminder/config.yaml")),
                Some(PathBuf::from("/etc/med-reminder/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
