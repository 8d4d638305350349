//! TOML configuration file loading
//!
//! Supports `~/.config/fluent-flow/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FluentConfigFile {
    /// Chat mode ("text" or "voice")
    #[serde(default)]
    pub mode: Option<String>,

    /// Backend endpoints and transport settings
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Conversation history limits
    #[serde(default)]
    pub history: HistoryFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for speech services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the text chat backend
    pub text_url: Option<String>,

    /// Base URL of the voice chat backend
    pub voice_url: Option<String>,

    /// Timeout for chat requests, in seconds
    pub request_timeout_secs: Option<u64>,

    /// Timeout for the health probe, in seconds
    pub health_timeout_secs: Option<u64>,

    /// Retry attempts for transient failures (0 disables)
    pub max_retries: Option<u32>,
}

/// History configuration
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFileConfig {
    /// Messages kept in memory
    pub max_entries: Option<usize>,

    /// Messages shown in the chat view
    pub display_window: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable microphone and speaker
    pub enabled: Option<bool>,

    /// Speak assistant replies aloud
    pub speak_replies: Option<bool>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// How often live transcription refreshes, in milliseconds
    pub partial_interval_ms: Option<u64>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FluentConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FluentConfigFile {
    config_file_path().map_or_else(FluentConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> FluentConfigFile {
    if !path.exists() {
        return FluentConfigFile::default();
    }

    match std::fs::read_to_string(path) {
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
                FluentConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FluentConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/fluent-flow/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fluent-flow").join("config.toml"))
}
