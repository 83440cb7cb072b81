//! Configuration management for Gitty
//!
//! Every option resolves as env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use self::file::GittyConfigFile;

/// Microphone sample rate required by recognition and wake word spotting
pub const SAMPLE_RATE: u32 = 16_000;

/// Default inference endpoint (OpenAI-compatible)
pub const DEFAULT_LLM_URL: &str = "https://api.groq.com/openai/v1";

/// Default inference model
pub const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";

/// Default speech recognition endpoint (OpenAI-compatible)
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1";

/// Gitty configuration
#[derive(Debug)]
pub struct Config {
    /// Inference service
    pub llm: LlmConfig,

    /// Speech recognition service
    pub stt: SttConfig,

    /// Wake word detection
    pub wake_word: WakeWordConfig,

    /// Speech capture
    pub capture: CaptureConfig,

    /// Interactive session
    pub session: SessionConfig,
}

/// Inference service configuration
#[derive(Debug)]
pub struct LlmConfig {
    /// Bearer token; required at the first inference call
    pub api_key: Option<SecretString>,

    /// OpenAI-compatible base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

/// Speech recognition configuration
#[derive(Debug)]
pub struct SttConfig {
    /// Bearer token for the transcription API
    pub api_key: Option<SecretString>,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Transcription model (e.g. "whisper-1")
    pub model: String,
}

/// Wake word configuration
#[derive(Debug)]
pub struct WakeWordConfig {
    /// Arm the detector when the session starts
    pub enabled: bool,

    /// Access key for the verification service
    pub access_key: Option<SecretString>,

    /// Trigger phrase file (one phrase per line)
    pub keyword_path: PathBuf,

    /// Spotter tuning file (TOML)
    pub model_path: PathBuf,

    /// Detection sensitivity in `[0, 1]`
    pub sensitivity: f32,

    /// Minimum spacing between accepted detections
    pub debounce: Duration,
}

/// Speech capture configuration
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Quiet period that ends an utterance
    pub silence: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_millis(2000),
        }
    }
}

/// Interactive session configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Show subcommand explanations on confirmation prompts
    pub learning_mode: bool,

    /// Maximum number of confirmed commands remembered
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            learning_mode: false,
            history_limit: 50,
        }
    }
}

/// Default wake word asset directory: `~/.local/share/gitty/wakeword/`
fn default_wake_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/gitty/wakeword"),
        |d| d.data_dir().join("gitty").join("wakeword"),
    )
}

/// Blank credentials count as unset, so a lower layer can still supply one
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl Config {
    /// Load configuration from the environment and the standard config file
    #[must_use]
    pub fn load() -> Self {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    #[must_use]
    pub fn resolve(fc: GittyConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        // Inference (env > toml > default)
        let llm = LlmConfig {
            api_key: non_blank(env("GROQ_API_KEY"))
                .or_else(|| non_blank(env("GITTY_API_KEY")))
                .or_else(|| non_blank(fc.llm.api_key))
                .map(SecretString::from),
            base_url: env("GITTY_LLM_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| DEFAULT_LLM_URL.to_string()),
            model: env("GITTY_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            temperature: fc.llm.temperature.unwrap_or(0.2),
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(30)),
        };

        // Speech recognition (env > toml > default)
        let stt = SttConfig {
            api_key: non_blank(env("OPENAI_API_KEY"))
                .or_else(|| non_blank(fc.stt.api_key))
                .map(SecretString::from),
            base_url: env("GITTY_STT_URL")
                .or(fc.stt.base_url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            model: env("GITTY_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
        };

        // Wake word (env > toml > default)
        let wake_dir = default_wake_dir();
        let wake_word = WakeWordConfig {
            enabled: env("GITTY_WAKE_WORD")
                .map(|v| parse_bool(&v))
                .or(fc.wake_word.enabled)
                .unwrap_or(true),
            access_key: non_blank(env("GITTY_WAKE_ACCESS_KEY"))
                .or_else(|| non_blank(fc.wake_word.access_key))
                .map(SecretString::from),
            keyword_path: env("GITTY_WAKE_KEYWORD_PATH")
                .or(fc.wake_word.keyword_path)
                .map_or_else(|| wake_dir.join("hey_gitty.txt"), PathBuf::from),
            model_path: env("GITTY_WAKE_MODEL_PATH")
                .or(fc.wake_word.model_path)
                .map_or_else(|| wake_dir.join("spotter.toml"), PathBuf::from),
            sensitivity: fc.wake_word.sensitivity.unwrap_or(0.7).clamp(0.0, 1.0),
            debounce: Duration::from_millis(
                env("GITTY_WAKE_DEBOUNCE_MS")
                    .and_then(|s| s.parse().ok())
                    .or(fc.wake_word.debounce_ms)
                    .unwrap_or(2000),
            ),
        };

        let capture = CaptureConfig {
            silence: Duration::from_millis(
                env("GITTY_SILENCE_MS")
                    .and_then(|s| s.parse().ok())
                    .or(fc.capture.silence_ms)
                    .unwrap_or(2000),
            ),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            learning_mode: env("GITTY_LEARNING_MODE")
                .map(|v| parse_bool(&v))
                .or(fc.session.learning_mode)
                .unwrap_or(defaults.learning_mode),
            history_limit: fc.session.history_limit.unwrap_or(defaults.history_limit),
        };

        Self {
            llm,
            stt,
            wake_word,
            capture,
            session,
        }
    }
}
