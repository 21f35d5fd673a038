//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-live/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveConfigFile {
    /// Gemini API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// File holding the system instruction
    #[serde(default)]
    pub instructions: Option<PathBuf>,

    /// Remote session configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Capture and playback configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Terminal waveform configuration
    #[serde(default)]
    pub visualizer: VisualizerFileConfig,
}

/// Remote session configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveFileConfig {
    /// WebSocket endpoint
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// Request transcription of the user's speech
    pub input_transcription: Option<bool>,

    /// Request transcription of the agent's speech
    pub output_transcription: Option<bool>,

    /// Handshake timeout in seconds
    pub connect_timeout_secs: Option<f64>,

    /// "playback" or "server"
    pub turn_detection: Option<String>,
}

/// Capture and playback configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioFileConfig {
    /// Samples per outbound frame
    pub chunk_size: Option<usize>,

    /// Outbound frames buffered before dropping the oldest
    pub queue_capacity: Option<usize>,

    /// Seconds before the playback horizon that count as caught up
    pub turn_tolerance: Option<f64>,
}

/// Terminal waveform configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisualizerFileConfig {
    pub enabled: Option<bool>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub fps: Option<u32>,
}

/// Parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn parse_config_file(path: &Path) -> Result<LiveConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the TOML config file from `path`, or the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> LiveConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return LiveConfigFile::default();
    };

    if !path.exists() {
        return LiveConfigFile::default();
    }

    match parse_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-live/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-live")
            .join("config.toml")
    })
}
