use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub whisper: WhisperConfig,
    pub stream: StreamConfig,
    pub session: SessionConfig,
    pub translation: TranslationConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Acoustic model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WhisperConfig {
    /// Model size name ("tiny", "base", "small", "medium", "large-v3").
    pub model_size: String,
    /// Explicit model file path; overrides `model_size` resolution when set.
    pub model_path: Option<PathBuf>,
    pub beam_size: u32,
    pub language: String,
    /// Concurrent transcription passes across all sessions.
    pub concurrency: usize,
}

/// Cumulative-buffer and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub max_audio_seconds: f64,
    pub overlap_seconds: f64,
    pub transcription_interval_chunks: u32,
    pub min_audio_seconds: f64,
    pub prompt_max_chars: usize,
    pub end_finalization_timeout_seconds: u64,
}

/// Session registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

/// JA->EN translation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TranslationConfig {
    /// External command (argv) that reads Japanese on stdin and writes
    /// English on stdout. Empty disables translation.
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::BIND_ADDR.to_string(),
        }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_size: defaults::MODEL_SIZE.to_string(),
            model_path: None,
            beam_size: defaults::BEAM_SIZE,
            language: defaults::LANGUAGE.to_string(),
            concurrency: defaults::TRANSCRIBER_CONCURRENCY,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_audio_seconds: defaults::MAX_AUDIO_SECONDS,
            overlap_seconds: defaults::OVERLAP_SECONDS,
            transcription_interval_chunks: defaults::TRANSCRIPTION_INTERVAL_CHUNKS,
            min_audio_seconds: defaults::MIN_AUDIO_SECONDS,
            prompt_max_chars: defaults::PROMPT_MAX_CHARS,
            end_finalization_timeout_seconds: defaults::END_FINALIZATION_TIMEOUT_SECONDS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_seconds: defaults::SESSION_IDLE_TTL_SECONDS,
            sweep_interval_seconds: defaults::SWEEP_INTERVAL_SECONDS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WHISPER_MODEL_SIZE → whisper.model_size
    /// - WHISPER_BEAM_SIZE → whisper.beam_size
    /// - CUMULATIVE_MAX_AUDIO_SECONDS → stream.max_audio_seconds
    /// - CUMULATIVE_TRANSCRIPTION_INTERVAL → stream.transcription_interval_chunks
    /// - CUMULATIVE_MIN_AUDIO_SECONDS → stream.min_audio_seconds
    /// - CUMULATIVE_OVERLAP_SECONDS → stream.overlap_seconds
    /// - SESSION_IDLE_TTL_SECONDS → session.idle_ttl_seconds
    /// - END_FINALIZATION_TIMEOUT_SECONDS → stream.end_finalization_timeout_seconds
    /// - PROMPT_MAX_CHARS → stream.prompt_max_chars
    ///
    /// Unparsable numeric values are ignored and the configured value kept.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(size) = std::env::var("WHISPER_MODEL_SIZE")
            && !size.is_empty()
        {
            self.whisper.model_size = size;
        }

        if let Ok(v) = std::env::var("WHISPER_BEAM_SIZE")
            && let Ok(beam) = v.parse::<u32>()
        {
            self.whisper.beam_size = beam;
        }

        if let Ok(v) = std::env::var("CUMULATIVE_MAX_AUDIO_SECONDS")
            && let Ok(secs) = v.parse::<f64>()
        {
            self.stream.max_audio_seconds = secs;
        }

        if let Ok(v) = std::env::var("CUMULATIVE_TRANSCRIPTION_INTERVAL")
            && let Ok(n) = v.parse::<u32>()
        {
            self.stream.transcription_interval_chunks = n;
        }

        if let Ok(v) = std::env::var("CUMULATIVE_MIN_AUDIO_SECONDS")
            && let Ok(secs) = v.parse::<f64>()
        {
            self.stream.min_audio_seconds = secs;
        }

        if let Ok(v) = std::env::var("CUMULATIVE_OVERLAP_SECONDS")
            && let Ok(secs) = v.parse::<f64>()
        {
            self.stream.overlap_seconds = secs;
        }

        if let Ok(v) = std::env::var("SESSION_IDLE_TTL_SECONDS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.session.idle_ttl_seconds = secs;
        }

        if let Ok(v) = std::env::var("END_FINALIZATION_TIMEOUT_SECONDS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.stream.end_finalization_timeout_seconds = secs;
        }

        if let Ok(v) = std::env::var("PROMPT_MAX_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.stream.prompt_max_chars = n;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/kikitori/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("kikitori")
            .join("config.toml")
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.stream.max_audio_seconds <= 0.0 {
            return Err(crate::error::KikitoriError::ConfigInvalidValue {
                key: "stream.max_audio_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.stream.overlap_seconds >= self.stream.max_audio_seconds {
            return Err(crate::error::KikitoriError::ConfigInvalidValue {
                key: "stream.overlap_seconds".to_string(),
                message: "must be smaller than max_audio_seconds".to_string(),
            });
        }
        if self.stream.transcription_interval_chunks == 0 {
            return Err(crate::error::KikitoriError::ConfigInvalidValue {
                key: "stream.transcription_interval_chunks".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.whisper.concurrency == 0 {
            return Err(crate::error::KikitoriError::ConfigInvalidValue {
                key: "whisper.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_stream_env() {
        remove_env("WHISPER_MODEL_SIZE");
        remove_env("WHISPER_BEAM_SIZE");
        remove_env("CUMULATIVE_MAX_AUDIO_SECONDS");
        remove_env("CUMULATIVE_TRANSCRIPTION_INTERVAL");
        remove_env("CUMULATIVE_MIN_AUDIO_SECONDS");
        remove_env("CUMULATIVE_OVERLAP_SECONDS");
        remove_env("SESSION_IDLE_TTL_SECONDS");
        remove_env("END_FINALIZATION_TIMEOUT_SECONDS");
        remove_env("PROMPT_MAX_CHARS");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8710");

        assert_eq!(config.whisper.model_size, "base");
        assert_eq!(config.whisper.model_path, None);
        assert_eq!(config.whisper.beam_size, 3);
        assert_eq!(config.whisper.language, "ja");
        assert_eq!(config.whisper.concurrency, 1);

        assert_eq!(config.stream.max_audio_seconds, 30.0);
        assert_eq!(config.stream.overlap_seconds, 5.0);
        assert_eq!(config.stream.transcription_interval_chunks, 1);
        assert_eq!(config.stream.min_audio_seconds, 1.0);
        assert_eq!(config.stream.prompt_max_chars, 224);
        assert_eq!(config.stream.end_finalization_timeout_seconds, 20);

        assert_eq!(config.session.idle_ttl_seconds, 1800);
        assert_eq!(config.session.sweep_interval_seconds, 60);

        assert!(config.translation.command.is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [server]
            bind_addr = "0.0.0.0:9000"

            [whisper]
            model_size = "small"
            beam_size = 5
            concurrency = 2

            [stream]
            max_audio_seconds = 25.0
            transcription_interval_chunks = 3

            [session]
            idle_ttl_seconds = 600

            [translation]
            command = ["opus-mt-cli", "--ja-en"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.whisper.model_size, "small");
        assert_eq!(config.whisper.beam_size, 5);
        assert_eq!(config.whisper.concurrency, 2);
        assert_eq!(config.stream.max_audio_seconds, 25.0);
        assert_eq!(config.stream.transcription_interval_chunks, 3);
        assert_eq!(config.session.idle_ttl_seconds, 600);
        assert_eq!(
            config.translation.command,
            vec!["opus-mt-cli".to_string(), "--ja-en".to_string()]
        );

        // Untouched sections keep defaults
        assert_eq!(config.stream.overlap_seconds, 5.0);
        assert_eq!(config.whisper.language, "ja");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [whisper]
            model_size = "medium"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.whisper.model_size, "medium");
        assert_eq!(config.whisper.beam_size, 3);
        assert_eq!(config.stream.max_audio_seconds, 30.0);
    }

    #[test]
    fn test_env_override_model_size() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_stream_env();

        set_env("WHISPER_MODEL_SIZE", "tiny");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.whisper.model_size, "tiny");
        assert_eq!(config.whisper.beam_size, 3); // Not overridden

        clear_stream_env();
    }

    #[test]
    fn test_env_override_numeric_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_stream_env();

        set_env("WHISPER_BEAM_SIZE", "5");
        set_env("CUMULATIVE_MAX_AUDIO_SECONDS", "25.0");
        set_env("CUMULATIVE_TRANSCRIPTION_INTERVAL", "3");
        set_env("CUMULATIVE_MIN_AUDIO_SECONDS", "2.5");
        set_env("CUMULATIVE_OVERLAP_SECONDS", "4.0");
        set_env("SESSION_IDLE_TTL_SECONDS", "900");
        set_env("END_FINALIZATION_TIMEOUT_SECONDS", "10");
        set_env("PROMPT_MAX_CHARS", "128");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.whisper.beam_size, 5);
        assert_eq!(config.stream.max_audio_seconds, 25.0);
        assert_eq!(config.stream.transcription_interval_chunks, 3);
        assert_eq!(config.stream.min_audio_seconds, 2.5);
        assert_eq!(config.stream.overlap_seconds, 4.0);
        assert_eq!(config.session.idle_ttl_seconds, 900);
        assert_eq!(config.stream.end_finalization_timeout_seconds, 10);
        assert_eq!(config.stream.prompt_max_chars, 128);

        clear_stream_env();
    }

    #[test]
    fn test_env_override_invalid_number_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_stream_env();

        set_env("WHISPER_BEAM_SIZE", "not-a-number");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.whisper.beam_size, 3);

        clear_stream_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_stream_env();

        set_env("WHISPER_MODEL_SIZE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.whisper.model_size, "base");

        clear_stream_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [stream
            max_audio_seconds = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());

        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_kikitori_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let invalid_toml = r#"
            [stream
            max_audio_seconds = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("kikitori"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_validate_rejects_overlap_above_max() {
        let mut config = Config::default();
        config.stream.overlap_seconds = 31.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.stream.transcription_interval_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
