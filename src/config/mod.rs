//! Configuration management for Beacon Live
//!
//! Resolution order per key: environment, then the TOML file, then the
//! built-in default.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::{
    AgentOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODEL, DEFAULT_QUEUE_CAPACITY, DEFAULT_VOICE,
    TurnDetection,
};
use crate::visualizer::VisualizerOptions;
use crate::voice::{DEFAULT_CHUNK_SIZE, DEFAULT_TOLERANCE};
use crate::{Error, Result};

use self::file::LiveConfigFile;

/// Gemini Live `BidiGenerateContent` WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Beacon Live configuration
#[derive(Clone)]
pub struct Config {
    /// Gemini API key (`GEMINI_API_KEY` or `GOOGLE_API_KEY`)
    pub api_key: Option<String>,

    /// WebSocket endpoint
    pub endpoint: String,

    /// Optional file holding the system instruction
    pub instructions: Option<PathBuf>,

    /// Session tunables
    pub agent: AgentOptions,

    /// Terminal waveform settings
    pub visualizer: VisualizerOptions,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("instructions", &self.instructions)
            .field("agent", &self.agent)
            .field("visualizer", &self.visualizer)
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with values from `env`
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn resolve(fc: LiveConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("GOOGLE_API_KEY"))
            .or(fc.api_key)
            .filter(|k| !k.trim().is_empty());

        let endpoint = env("BEACON_LIVE_ENDPOINT")
            .or(fc.live.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        url::Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{endpoint}': {e}")))?;

        let transcription = parse_env::<bool>(&env, "BEACON_LIVE_TRANSCRIPTION")?;

        let connect_timeout_secs = parse_env::<f64>(&env, "BEACON_LIVE_CONNECT_TIMEOUT")?
            .or(fc.live.connect_timeout_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_secs_f64());
        if !connect_timeout_secs.is_finite() || connect_timeout_secs <= 0.0 {
            return Err(Error::Config(format!(
                "connect timeout must be positive, got {connect_timeout_secs}"
            )));
        }

        let turn_detection = match env("BEACON_LIVE_TURN_DETECTION").or(fc.live.turn_detection) {
            Some(mode) => mode.parse()?,
            None => TurnDetection::default(),
        };

        let chunk_size = parse_env::<usize>(&env, "BEACON_LIVE_CHUNK_SIZE")?
            .or(fc.audio.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let queue_capacity = parse_env::<usize>(&env, "BEACON_LIVE_QUEUE_CAPACITY")?
            .or(fc.audio.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if chunk_size == 0 || queue_capacity == 0 {
            return Err(Error::Config(
                "chunk_size and queue_capacity must be at least 1".to_string(),
            ));
        }

        let tolerance = parse_env::<f64>(&env, "BEACON_LIVE_TURN_TOLERANCE")?
            .or(fc.audio.turn_tolerance)
            .unwrap_or(DEFAULT_TOLERANCE);
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(Error::Config(format!(
                "turn tolerance must be non-negative, got {tolerance}"
            )));
        }

        let agent = AgentOptions {
            model: env("BEACON_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("BEACON_LIVE_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            input_transcription: transcription
                .or(fc.live.input_transcription)
                .unwrap_or(true),
            output_transcription: transcription
                .or(fc.live.output_transcription)
                .unwrap_or(true),
            connect_timeout: Duration::from_secs_f64(connect_timeout_secs),
            chunk_size,
            queue_capacity,
            tolerance,
            turn_detection,
        };

        let defaults = VisualizerOptions::default();
        let visualizer = VisualizerOptions {
            enabled: parse_env::<bool>(&env, "BEACON_LIVE_VISUALIZER")?
                .or(fc.visualizer.enabled)
                .unwrap_or(defaults.enabled),
            width: fc.visualizer.width.unwrap_or(defaults.width).max(1),
            height: fc.visualizer.height.unwrap_or(defaults.height).max(1),
            fps: fc.visualizer.fps.unwrap_or(defaults.fps).clamp(1, 120),
        };

        let instructions = env("BEACON_LIVE_INSTRUCTIONS")
            .map(PathBuf::from)
            .or(fc.instructions);

        Ok(Self {
            api_key,
            endpoint,
            instructions,
            agent,
            visualizer,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            instructions: None,
            agent: AgentOptions::default(),
            visualizer: VisualizerOptions::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: '{raw}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn file_from(toml_text: &str) -> LiveConfigFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_text.as_bytes()).unwrap();
        file::parse_config_file(file.path()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(LiveConfigFile::default(), env_of(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.agent, AgentOptions::default());
        assert_eq!(config.visualizer, VisualizerOptions::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file_from(
            r#"
api_key = "file-key"

[live]
model = "file-model"
voice = "Puck"
"#,
        );
        let config = Config::resolve(
            fc,
            env_of(&[("GEMINI_API_KEY", "env-key"), ("BEACON_LIVE_MODEL", "env-model")]),
        )
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.agent.model, "env-model");
        assert_eq!(config.agent.voice, "Puck");
    }

    #[test]
    fn test_google_key_fallback() {
        let config = Config::resolve(
            LiveConfigFile::default(),
            env_of(&[("GEMINI_API_KEY", "  "), ("GOOGLE_API_KEY", "g-key")]),
        )
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn test_file_values_applied() {
        let fc = file_from(
            r#"
instructions = "/etc/beacon/prompt.txt"

[live]
connect_timeout_secs = 5
turn_detection = "server"
output_transcription = false

[audio]
chunk_size = 1024
queue_capacity = 8
turn_tolerance = 0.25

[visualizer]
enabled = false
fps = 500
"#,
        );
        let config = Config::resolve(fc, env_of(&[])).unwrap();

        assert_eq!(config.agent.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.agent.turn_detection, TurnDetection::Server);
        assert!(config.agent.input_transcription);
        assert!(!config.agent.output_transcription);
        assert_eq!(config.agent.chunk_size, 1024);
        assert_eq!(config.agent.queue_capacity, 8);
        assert!((config.agent.tolerance - 0.25).abs() < f64::EPSILON);
        assert!(!config.visualizer.enabled);
        assert_eq!(config.visualizer.fps, 120);
        assert_eq!(
            config.instructions.as_deref(),
            Some(Path::new("/etc/beacon/prompt.txt"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_env = [
            ("BEACON_LIVE_CHUNK_SIZE", "lots"),
            ("BEACON_LIVE_CHUNK_SIZE", "0"),
            ("BEACON_LIVE_CONNECT_TIMEOUT", "-1"),
            ("BEACON_LIVE_TURN_DETECTION", "vad"),
            ("BEACON_LIVE_TURN_TOLERANCE", "-0.5"),
            ("BEACON_LIVE_ENDPOINT", "not a url"),
        ];
        for pair in bad_env {
            let result = Config::resolve(LiveConfigFile::default(), env_of(&[pair]));
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{pair:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config {
            api_key: Some("top-secret".to_string()),
            ..Config::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("top-secret"));
    }
}
