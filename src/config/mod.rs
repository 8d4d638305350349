//! Configuration management for Fluent Flow
//!
//! Precedence: CLI flags > environment > TOML file > defaults.

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::client::RetryPolicy;
use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

pub use file::{FluentConfigFile, config_file_path, load_config_file, load_config_file_from};

/// Which backend a session talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatMode {
    /// Typed turns against `/chat`; the microphone only fills the input line
    #[default]
    Text,
    /// Recorded turns against `/chat/voice`; stopping a recording sends it
    Voice,
}

impl FromStr for ChatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            other => Err(Error::Config(format!("unknown chat mode: {other}"))),
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Voice => f.write_str("voice"),
        }
    }
}

/// Fluent Flow configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Active chat mode
    pub mode: ChatMode,

    /// Backend endpoints and transport settings
    pub backend: BackendConfig,

    /// Conversation history limits
    pub history: HistoryConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys for speech services
    pub api_keys: ApiKeys,
}

/// Backend endpoints and transport settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the text chat backend
    pub text_url: Url,

    /// Base URL of the voice chat backend
    pub voice_url: Url,

    /// Timeout applied to every chat request
    pub request_timeout: Duration,

    /// Timeout applied to the health probe
    pub health_timeout: Duration,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            text_url: default_url("http://127.0.0.1:5000"),
            voice_url: default_url("http://localhost:8000"),
            request_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

/// Conversation history limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Messages kept in memory; oldest are dropped first
    pub max_entries: usize,

    /// Messages shown in the chat view
    pub display_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            display_window: 6,
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone and speaker
    pub enabled: bool,

    /// Speak assistant replies aloud
    pub speak_replies: bool,

    /// Live transcription provider
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// How often live transcription refreshes while recording
    pub partial_interval: Duration,

    /// Reply synthesis provider
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speak_replies: true,
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            partial_interval: Duration::from_millis(1500),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// API keys for speech services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl ApiKeys {
    /// Key for the given STT provider
    #[must_use]
    pub const fn for_stt(&self, provider: SttProvider) -> Option<&SecretString> {
        match provider {
            SttProvider::Whisper => self.openai.as_ref(),
            SttProvider::Deepgram => self.deepgram.as_ref(),
        }
    }

    /// Key for the given TTS provider
    #[must_use]
    pub const fn for_tts(&self, provider: TtsProvider) -> Option<&SecretString> {
        match provider {
            TtsProvider::OpenAi => self.openai.as_ref(),
            TtsProvider::ElevenLabs => self.elevenlabs.as_ref(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources(fc: FluentConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let mode = env("FLUENT_MODE")
            .or(fc.mode)
            .map(|m| m.parse())
            .transpose()?
            .unwrap_or(defaults.mode);

        // Backend (env > toml > default)
        let text_url = env("FLUENT_TEXT_URL")
            .or(fc.backend.text_url)
            .map(|u| parse_url(&u))
            .transpose()?
            .unwrap_or(defaults.backend.text_url);
        let voice_url = env("FLUENT_VOICE_URL")
            .or(fc.backend.voice_url)
            .map(|u| parse_url(&u))
            .transpose()?
            .unwrap_or(defaults.backend.voice_url);
        let request_timeout = parsed(&env, "FLUENT_REQUEST_TIMEOUT_SECS")?
            .or(fc.backend.request_timeout_secs)
            .map_or(defaults.backend.request_timeout, Duration::from_secs);
        let health_timeout = parsed(&env, "FLUENT_HEALTH_TIMEOUT_SECS")?
            .or(fc.backend.health_timeout_secs)
            .map_or(defaults.backend.health_timeout, Duration::from_secs);
        let retry = RetryPolicy {
            max_retries: parsed(&env, "FLUENT_MAX_RETRIES")?
                .or(fc.backend.max_retries)
                .unwrap_or(defaults.backend.retry.max_retries),
            ..defaults.backend.retry
        };

        if request_timeout.is_zero() || health_timeout.is_zero() {
            return Err(Error::Config("timeouts must be at least one second".to_string()));
        }

        // History
        let history = HistoryConfig {
            max_entries: parsed(&env, "FLUENT_HISTORY_LIMIT")?
                .or(fc.history.max_entries)
                .unwrap_or(defaults.history.max_entries),
            display_window: parsed(&env, "FLUENT_HISTORY_DISPLAY")?
                .or(fc.history.display_window)
                .unwrap_or(defaults.history.display_window),
        };
        if history.max_entries == 0 {
            return Err(Error::Config("history limit must be at least 1".to_string()));
        }

        // Voice
        let voice_enabled = if parsed::<bool>(&env, "FLUENT_DISABLE_VOICE")?.unwrap_or(false) {
            tracing::info!("voice disabled via FLUENT_DISABLE_VOICE");
            false
        } else {
            fc.voice.enabled.unwrap_or(defaults.voice.enabled)
        };
        let voice = VoiceConfig {
            enabled: voice_enabled,
            speak_replies: parsed(&env, "FLUENT_SPEAK_REPLIES")?
                .or(fc.voice.speak_replies)
                .unwrap_or(defaults.voice.speak_replies),
            stt_provider: env("FLUENT_STT_PROVIDER")
                .or(fc.voice.stt_provider)
                .map(|p| p.parse())
                .transpose()?
                .unwrap_or(defaults.voice.stt_provider),
            stt_model: env("FLUENT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.voice.stt_model),
            partial_interval: fc
                .voice
                .partial_interval_ms
                .map_or(defaults.voice.partial_interval, Duration::from_millis),
            tts_provider: env("FLUENT_TTS_PROVIDER")
                .or(fc.voice.tts_provider)
                .map(|p| p.parse())
                .transpose()?
                .unwrap_or(defaults.voice.tts_provider),
            tts_model: env("FLUENT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.voice.tts_model),
            tts_voice: env("FLUENT_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or(defaults.voice.tts_voice),
            tts_speed: parsed(&env, "FLUENT_TTS_SPEED")?
                .or(fc.voice.tts_speed)
                .unwrap_or(defaults.voice.tts_speed),
        };
        if !(0.25..=4.0).contains(&voice.tts_speed) {
            return Err(Error::Config(format!(
                "TTS speed {} outside 0.25..=4.0",
                voice.tts_speed
            )));
        }

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
        };

        Ok(Self {
            mode,
            backend: BackendConfig {
                text_url,
                voice_url,
                request_timeout,
                health_timeout,
                retry,
            },
            history,
            voice,
            api_keys,
        })
    }
}

/// Parse an optional environment value, naming the variable on failure
fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}

/// Parse a backend base URL
fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::Config(format!("invalid URL {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!("unsupported URL scheme: {raw}")));
    }
    Ok(url)
}

#[allow(clippy::expect_used)]
fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in URL is valid")
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_backends() {
        let config = Config::from_sources(FluentConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.mode, ChatMode::Text);
        assert_eq!(config.backend.text_url.as_str(), "http://127.0.0.1:5000/");
        assert_eq!(config.backend.voice_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(30));
        assert_eq!(config.history, HistoryConfig::default());
        assert!(config.voice.enabled);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = FluentConfigFile::default();
        fc.mode = Some("text".to_string());
        fc.history.max_entries = Some(20);
        fc.backend.text_url = Some("http://file.local".to_string());

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("FLUENT_MODE", "voice"),
                ("FLUENT_TEXT_URL", "http://env.local:5000"),
                ("FLUENT_MAX_RETRIES", "0"),
            ]),
        )
        .unwrap();

        assert_eq!(config.mode, ChatMode::Voice);
        assert_eq!(config.backend.text_url.host_str(), Some("env.local"));
        assert_eq!(config.backend.retry.max_retries, 0);
        assert_eq!(config.history.max_entries, 20);
    }

    #[test]
    fn disable_voice_wins_over_file() {
        let mut fc = FluentConfigFile::default();
        fc.voice.enabled = Some(true);

        let config =
            Config::from_sources(fc, env_from(&[("FLUENT_DISABLE_VOICE", "true")])).unwrap();
        assert!(!config.voice.enabled);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("FLUENT_MODE", "telepathy"),
            ("FLUENT_HISTORY_LIMIT", "0"),
            ("FLUENT_HISTORY_LIMIT", "ten"),
            ("FLUENT_TEXT_URL", "ftp://example.com"),
            ("FLUENT_TTS_SPEED", "9.5"),
            ("FLUENT_REQUEST_TIMEOUT_SECS", "0"),
        ];

        for (key, value) in cases {
            let result = Config::from_sources(FluentConfigFile::default(), env_from(&[(key, value)]));
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn blank_keys_are_ignored() {
        let config = Config::from_sources(
            FluentConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "  "), ("DEEPGRAM_API_KEY", "dg-key")]),
        )
        .unwrap();

        assert!(config.api_keys.openai.is_none());
        assert_eq!(
            config
                .api_keys
                .for_stt(SttProvider::Deepgram)
                .map(|k| k.expose_secret()),
            Some("dg-key")
        );
    }

    #[test]
    fn chat_mode_round_trips_through_display() {
        for mode in [ChatMode::Text, ChatMode::Voice] {
            assert_eq!(mode.to_string().parse::<ChatMode>().unwrap(), mode);
        }
    }
}
