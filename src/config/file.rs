//! TOML configuration file loading
//!
//! Supports `~/.config/omni/spyglass/config.toml` as a persistent config
//! source. All fields are optional, the file is a partial overlay on top
//! of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SpyglassConfigFile {
    /// Account name for local storage (defaults to "local")
    #[serde(default)]
    pub account: Option<String>,

    /// Data directory override
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Persona text shared by the realtime and fallback paths
    #[serde(default)]
    pub system_instruction: Option<String>,

    /// Realtime session configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Streaming text fallback configuration
    #[serde(default)]
    pub fallback: FallbackFileConfig,

    /// Local speech synthesis configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Realtime session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Realtime model identifier (e.g. "gemini-2.0-flash-live-001")
    pub model: Option<String>,

    /// API host to dial
    pub host: Option<String>,

    /// Prebuilt voice name for spoken replies (e.g. "Puck")
    pub voice: Option<String>,
}

/// Streaming text fallback configuration
#[derive(Debug, Default, Deserialize)]
pub struct FallbackFileConfig {
    /// Fallback model identifier (e.g. "gemini-2.0-flash")
    pub model: Option<String>,

    /// Base URL for the generation endpoint
    pub base_url: Option<String>,
}

/// Local speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Enable spoken fallback replies
    pub enabled: Option<bool>,

    /// Synthesis model (e.g. "tts-1")
    pub model: Option<String>,

    /// Synthesis voice (e.g. "alloy")
    pub voice: Option<String>,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SpyglassConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SpyglassConfigFile {
    let Some(path) = config_file_path() else {
        return SpyglassConfigFile::default();
    };

    if !path.exists() {
        return SpyglassConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SpyglassConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SpyglassConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/spyglass/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("spyglass")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses_with_defaults() {
        let parsed: SpyglassConfigFile = toml::from_str(
            r#"
            [live]
            voice = "Kore"

            [api_keys]
            gemini = "abc123"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.live.voice.as_deref(), Some("Kore"));
        assert!(parsed.live.model.is_none());
        assert_eq!(parsed.api_keys.gemini.as_deref(), Some("abc123"));
        assert!(parsed.speech.enabled.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let parsed: SpyglassConfigFile = toml::from_str("").unwrap();
        assert!(parsed.account.is_none());
        assert!(parsed.fallback.model.is_none());
    }
}
