//! Configuration types for the Parley orchestrator.
//!
//! Configuration is read from `parley.json` (camelCase keys). Every field has
//! a default, unknown fields are ignored, and enum values are matched
//! case-insensitively. Secrets are never stored in the file; the file names
//! the environment variables that hold them.

use std::path::Path;
use std::time::Duration;

use parley_gateway::{DifficultyPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "parley.json";

const fn default_max_questions() -> u32 {
    5
}

const fn default_duplicate_retries() -> u32 {
    3
}

const fn default_max_resume_bytes() -> usize {
    2 * 1024 * 1024
}

const fn default_max_audio_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_model() -> String {
    parley_gateway::gemini::DEFAULT_MODEL.to_string()
}

fn default_tts_model() -> String {
    parley_gateway::gemini::DEFAULT_TTS_MODEL.to_string()
}

fn default_voice() -> String {
    parley_gateway::gemini::DEFAULT_VOICE.to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    8_000
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_audio_dir() -> String {
    ".parley/audio".to_string()
}

fn default_data_dir() -> String {
    ".parley/sessions".to_string()
}

fn default_jwt_secret_env() -> String {
    "JWT_SECRET".to_string()
}

const fn default_channel_capacity() -> usize {
    100
}

const fn default_heartbeat_secs() -> u64 {
    30
}

/// Main configuration for the Parley service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Number of questions in a complete interview.
    #[serde(default = "default_max_questions")]
    pub max_questions: u32,

    /// How many times a duplicate question is regenerated before it is accepted.
    #[serde(default = "default_duplicate_retries")]
    pub duplicate_retries: u32,

    /// How answer analysis signals map to the next difficulty.
    #[serde(default)]
    pub difficulty_policy: DifficultyPolicy,

    /// Known candidate ids. When absent, any authenticated candidate is accepted.
    #[serde(default)]
    pub candidates: Option<Vec<String>>,

    /// Largest accepted resume upload in bytes.
    #[serde(default = "default_max_resume_bytes")]
    pub max_resume_bytes: usize,

    /// Largest accepted audio answer in bytes.
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,

    /// AI provider settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Speech synthesis and transcription settings.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Session persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Credential validation settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Streaming settings.
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_questions: default_max_questions(),
            duplicate_retries: default_duplicate_retries(),
            difficulty_policy: DifficultyPolicy::default(),
            candidates: None,
            max_resume_bytes: default_max_resume_bytes(),
            max_audio_bytes: default_max_audio_bytes(),
            gateway: GatewayConfig::default(),
            speech: SpeechConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `parley.json` in the current directory. If not found, returns
    /// the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ParleyError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `parley.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration. A file that exists but
    /// is not valid JSON yields `ParleyError::ConfigParseError`; values that
    /// parse but make no sense yield `ParleyError::ConfigValidationError`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ParleyError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ParleyError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_questions == 0 {
            return Err(ParleyError::config_validation(
                "maxQuestions must be greater than 0",
                "Set maxQuestions to at least 1 in your parley.json",
            ));
        }

        if self.gateway.max_attempts == 0 {
            return Err(ParleyError::config_validation(
                "gateway.maxAttempts must be greater than 0",
                "Set gateway.maxAttempts to at least 1 in your parley.json",
            ));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(ParleyError::config_validation(
                "gateway.timeoutSecs must be greater than 0",
                "Set gateway.timeoutSecs to at least 1 second in your parley.json",
            ));
        }

        if self.gateway.model.trim().is_empty() {
            return Err(ParleyError::config_validation(
                "gateway.model must not be empty",
                "Name a model such as \"gemini-2.5-flash\" in your parley.json",
            ));
        }

        if self.max_resume_bytes == 0 || self.max_audio_bytes == 0 {
            return Err(ParleyError::config_validation(
                "maxResumeBytes and maxAudioBytes must be greater than 0",
                "Remove the fields to use the defaults (2 MiB and 10 MiB)",
            ));
        }

        if self.stream.channel_capacity == 0 || self.stream.heartbeat_secs == 0 {
            return Err(ParleyError::config_validation(
                "stream.channelCapacity and stream.heartbeatSecs must be greater than 0",
                "Remove the fields to use the defaults (100 events, 30 seconds)",
            ));
        }

        if self.store.backend == StoreBackend::File && self.store.data_dir.trim().is_empty() {
            return Err(ParleyError::config_validation(
                "store.dataDir must not be empty when store.backend is \"file\"",
                "Provide a directory for session files in your parley.json",
            ));
        }

        if self.speech.enabled && self.speech.audio_dir.trim().is_empty() {
            return Err(ParleyError::config_validation(
                "speech.audioDir must not be empty when speech is enabled",
                "Provide a directory for synthesized audio in your parley.json",
            ));
        }

        if let Some(candidates) = &self.candidates {
            if candidates.iter().any(|c| c.trim().is_empty()) {
                return Err(ParleyError::config_validation(
                    "candidates must not contain empty ids",
                    "Remove empty strings from the candidates list in your parley.json",
                ));
            }
        }

        Ok(())
    }

    /// Retry policy for AI calls derived from the gateway settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.gateway.max_attempts,
            base_delay: Duration::from_millis(self.gateway.base_delay_ms),
            max_delay: Duration::from_millis(self.gateway.max_delay_ms),
            timeout: Duration::from_secs(self.gateway.timeout_secs),
        }
    }
}

/// AI provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Text model used for questions, analysis and transcription.
    #[serde(default = "default_model")]
    pub model: String,

    /// Text-to-speech model.
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Prebuilt voice for synthesized questions.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Attempts per AI call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a retry delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Time budget of one attempt in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            tts_model: default_tts_model(),
            voice: default_voice(),
            api_key_env: default_api_key_env(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Whether questions are synthesized and audio answers accepted.
    #[serde(default)]
    pub enabled: bool,

    /// Directory synthesized audio is written to and served from.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            audio_dir: default_audio_dir(),
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Which store to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for session files when `backend` is `file`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Credential validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// How bearer tokens are validated.
    #[serde(default)]
    pub mode: AuthMode,

    /// Environment variable holding the JWT signing secret.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            jwt_secret_env: default_jwt_secret_env(),
        }
    }
}

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Events buffered per session before slow subscribers lag.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// WebSocket ping interval in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// What happens to an in-progress session when its stream disconnects.
    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
            on_disconnect: DisconnectPolicy::default(),
        }
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Session store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON file per session (default).
    #[default]
    File,
    /// In-process map; sessions are lost on restart.
    Memory,
}

/// Credential validation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// The bearer token is the candidate id (default; development only).
    #[default]
    Passthrough,
    /// HS256 JSON Web Tokens.
    Jwt,
}

/// Behavior when a streaming client disconnects mid-interview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Leave the session in progress so the client can resume (default).
    #[default]
    Keep,
    /// Stop the session.
    Stop,
}

/// Implements case-insensitive string (de)serialization for a config enum.
macro_rules! case_insensitive_enum {
    ($ty:ty, $what:literal, { $($name:literal => $variant:path),+ $(,)? }) => {
        impl $ty {
            /// Parses a value, ignoring case.
            #[must_use]
            pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($name => Some($variant),)+
                    _ => None,
                }
            }

            /// Returns the canonical lowercase name.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $name,)+
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_str_case_insensitive(&s).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        concat!("invalid ", $what, " '{}': expected one of ", $(" '", $name, "'",)+),
                        s
                    ))
                })
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

case_insensitive_enum!(StoreBackend, "store backend", {
    "file" => StoreBackend::File,
    "memory" => StoreBackend::Memory,
});

case_insensitive_enum!(AuthMode, "auth mode", {
    "passthrough" => AuthMode::Passthrough,
    "jwt" => AuthMode::Jwt,
});

case_insensitive_enum!(DisconnectPolicy, "disconnect policy", {
    "keep" => DisconnectPolicy::Keep,
    "stop" => DisconnectPolicy::Stop,
});

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.max_questions, 5);
        assert_eq!(config.duplicate_retries, 3);
        assert_eq!(config.difficulty_policy, DifficultyPolicy::Absolute);
        assert!(config.candidates.is_none());
        assert_eq!(config.gateway.model, "gemini-2.5-flash");
        assert_eq!(config.gateway.api_key_env, "GEMINI_API_KEY");
        assert!(!config.speech.enabled);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.auth.mode, AuthMode::Passthrough);
        assert_eq!(config.stream.on_disconnect, DisconnectPolicy::Keep);
        assert_eq!(config.stream.channel_capacity, 100);
    }

    #[test]
    fn test_retry_policy_from_gateway_settings() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "maxQuestions": 3,
            "difficultyPolicy": "Ladder",
            "candidates": ["alice", "bob"],
            "gateway": {"maxAttempts": 2, "timeoutSecs": 10},
            "store": {"backend": "MEMORY"},
            "auth": {"mode": "jwt", "jwtSecretEnv": "PARLEY_SECRET"},
            "stream": {"onDisconnect": "stop"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.max_questions, 3);
        assert_eq!(config.difficulty_policy, DifficultyPolicy::Ladder);
        assert_eq!(config.candidates.as_deref().unwrap().len(), 2);
        assert_eq!(config.gateway.max_attempts, 2);
        assert_eq!(config.gateway.base_delay_ms, 500);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.auth.mode, AuthMode::Jwt);
        assert_eq!(config.auth.jwt_secret_env, "PARLEY_SECRET");
        assert_eq!(config.stream.on_disconnect, DisconnectPolicy::Stop);
        assert_eq!(config.stream.heartbeat_secs, 30);
    }

    #[test]
    fn test_enum_serialization_round_trip_names() {
        assert_eq!(
            serde_json::to_string(&StoreBackend::Memory).unwrap(),
            r#""memory""#
        );
        assert_eq!(serde_json::to_string(&AuthMode::Jwt).unwrap(), r#""jwt""#);
        assert_eq!(
            serde_json::to_string(&DisconnectPolicy::Keep).unwrap(),
            r#""keep""#
        );
    }

    #[test]
    fn test_invalid_enum_value_error() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"store": {"backend": "postgres"}}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid store backend 'postgres'"));
        assert!(err.contains("'memory'"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config: Config =
            serde_json::from_str(r#"{"maxQuestions": 4, "unknownField": true}"#).unwrap();
        assert_eq!(config.max_questions, 4);
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("parley.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"maxQuestions": 7, "speech": {"enabled": true}}"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.max_questions, 7);
        assert!(config.speech.enabled);
        assert_eq!(config.speech.audio_dir, ".parley/audio");
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("parley.json");
        std::fs::write(&config_path, "{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, ParleyError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/parley.json")).unwrap();
        assert_eq!(config.max_questions, 5);
    }

    #[test]
    fn test_load_from_dir_finds_parley_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"duplicateRetries": 1}"#).unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.duplicate_retries, 1);
    }

    #[test]
    fn test_config_validation_zero_max_questions() {
        let config = Config {
            max_questions: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ParleyError::ConfigValidationError { .. }));
        assert!(err.to_string().contains("maxQuestions"));
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = Config::default();
        config.gateway.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_candidate() {
        let config = Config {
            candidates: Some(vec!["alice".into(), "  ".into()]),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("parley.json");
        std::fs::write(&config_path, r#"{"stream": {"channelCapacity": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, ParleyError::ConfigValidationError { .. }));
    }
}
