//! Configuration management for the Spyglass client

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::live::transport::{DEFAULT_LIVE_HOST, LiveEndpoint};
use crate::live::{
    DEFAULT_FALLBACK_MODEL, DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
    SessionSettings, usage::TokenCosts,
};
use crate::speech::SpeechSettings;

/// Spyglass client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Account name for local storage
    pub account: String,

    /// Path to data directory (database, caches)
    pub data_dir: PathBuf,

    /// Persona text shared by the realtime and fallback paths
    pub system_instruction: String,

    /// Realtime session configuration
    pub live: LiveConfig,

    /// Streaming text fallback configuration
    pub fallback: FallbackConfig,

    /// Local speech synthesis configuration
    pub speech: SpeechOutputConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Realtime session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Realtime model identifier
    pub model: String,

    /// API host to dial
    pub host: String,

    /// Prebuilt voice name for spoken replies
    pub voice: String,
}

/// Streaming text fallback configuration
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Fallback model identifier
    pub model: String,

    /// Base URL for the generation endpoint
    pub base_url: String,
}

/// Local speech synthesis configuration
#[derive(Debug, Clone)]
pub struct SpeechOutputConfig {
    /// Enable spoken fallback replies
    pub enabled: bool,

    /// Synthesis model (e.g. "tts-1")
    pub model: String,

    /// Synthesis voice (e.g. "alloy")
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Gemini API key (realtime session and text fallback)
    pub gemini: Option<SecretString>,

    /// `OpenAI` API key (speech synthesis for fallback replies)
    pub openai: Option<SecretString>,
}

impl Config {
    /// Load configuration with layering: env > toml > default
    #[must_use]
    pub fn load() -> Self {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit speech disable option
    #[must_use]
    pub fn load_with_options(disable_speech: bool) -> Self {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();

        let account = std::env::var("SPYGLASS_ACCOUNT")
            .ok()
            .or(fc.account)
            .unwrap_or_else(|| "local".to_string());

        // Data directory (~/.local/share/omni/spyglass on Linux)
        let data_dir = std::env::var("SPYGLASS_DATA_DIR")
            .ok()
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);
        std::fs::create_dir_all(&data_dir).ok();

        let system_instruction = std::env::var("SPYGLASS_SYSTEM_INSTRUCTION")
            .ok()
            .or(fc.system_instruction)
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        let live = LiveConfig {
            model: std::env::var("SPYGLASS_LIVE_MODEL")
                .ok()
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            host: std::env::var("SPYGLASS_LIVE_HOST")
                .ok()
                .or(fc.live.host)
                .unwrap_or_else(|| DEFAULT_LIVE_HOST.to_string()),
            voice: std::env::var("SPYGLASS_VOICE")
                .ok()
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        };

        let fallback = FallbackConfig {
            model: std::env::var("SPYGLASS_FALLBACK_MODEL")
                .ok()
                .or(fc.fallback.model)
                .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string()),
            base_url: std::env::var("SPYGLASS_FALLBACK_URL")
                .ok()
                .or(fc.fallback.base_url)
                .unwrap_or_else(|| crate::fallback::DEFAULT_GENERATE_BASE.to_string()),
        };

        let speech_enabled = if disable_speech {
            false
        } else {
            std::env::var("SPYGLASS_SPEECH")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.speech.enabled)
                .unwrap_or(true)
        };
        if disable_speech {
            tracing::info!("speech explicitly disabled via --no-speech");
        }
        let speech = SpeechOutputConfig {
            enabled: speech_enabled,
            model: std::env::var("SPYGLASS_TTS_MODEL")
                .ok()
                .or(fc.speech.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: std::env::var("SPYGLASS_TTS_VOICE")
                .ok()
                .or(fc.speech.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: std::env::var("SPYGLASS_TTS_SPEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.speech.speed)
                .unwrap_or(1.0),
        };

        let api_keys = ApiKeys {
            gemini: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .ok()
                .or(fc.api_keys.gemini)
                .map(SecretString::from),
            openai: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.api_keys.openai)
                .map(SecretString::from),
        };

        Self {
            account,
            data_dir,
            system_instruction,
            live,
            fallback,
            speech,
            api_keys,
        }
    }

    /// Path to the local SQLite database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("spyglass.db")
    }

    /// Realtime endpoint for the given key
    #[must_use]
    pub fn live_endpoint(&self, api_key: SecretString) -> LiveEndpoint {
        LiveEndpoint {
            host: self.live.host.clone(),
            api_key,
        }
    }

    /// Session settings for the given key
    #[must_use]
    pub fn session_settings(&self, api_key: SecretString) -> SessionSettings {
        SessionSettings {
            live_model: self.live.model.clone(),
            fallback_model: self.fallback.model.clone(),
            fallback_base: self.fallback.base_url.clone(),
            api_key,
            voice: self.live.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            costs: TokenCosts::default(),
        }
    }

    /// Speech synthesis settings
    #[must_use]
    pub fn speech_settings(&self) -> SpeechSettings {
        SpeechSettings {
            voice: self.speech.voice.clone(),
            model: self.speech.model.clone(),
            speed: self.speech.speed,
        }
    }
}

/// Default data directory: `~/.local/share/omni/spyglass/`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/spyglass"),
        |d| d.data_dir().join("omni").join("spyglass"),
    )
}
