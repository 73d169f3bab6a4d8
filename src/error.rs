//! Error types for the Spyglass client

use thiserror::Error;

/// Result type alias for Spyglass operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Spyglass client
#[derive(Debug, Error)]
pub enum Error {
    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// PCM codec error (bad base64, malformed payload)
    #[error("codec error: {0}")]
    Codec(String),

    /// Realtime transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Fallback generation error
    #[error("fallback error: {0}")]
    Fallback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Authentication error
    #[error("auth error: {0}")]
    Auth(String),
}
