//! Error types for Beacon Live

use thiserror::Error;

/// Result type alias for Beacon Live operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Beacon Live
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required credential (API key) is not configured
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Microphone access was refused by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// PCM/base64 encoding or decoding error
    #[error("codec error: {0}")]
    Codec(String),

    /// Resampling error
    #[error("resample error: {0}")]
    Resample(String),

    /// Remote transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// System instruction could not be loaded
    #[error("knowledge error: {0}")]
    Knowledge(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
