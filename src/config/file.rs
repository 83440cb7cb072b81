//! TOML configuration file loading
//!
//! Supports `~/.config/gitty/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GittyConfigFile {
    /// Inference service configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Wake word configuration
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Speech capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Interactive session configuration
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Inference service configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL (e.g. `https://api.groq.com/openai/v1`)
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    pub enabled: Option<bool>,
    pub access_key: Option<String>,
    /// Trigger phrase file
    pub keyword_path: Option<String>,
    /// Spotter tuning file
    pub model_path: Option<String>,
    pub sensitivity: Option<f32>,
    pub debounce_ms: Option<u64>,
}

/// Speech capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Silence that ends an utterance, in milliseconds
    pub silence_ms: Option<u64>,
}

/// Interactive session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub learning_mode: Option<bool>,
    pub history_limit: Option<usize>,
}

/// Standard config file location: `<config_dir>/gitty/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("gitty").join("config.toml"))
}

/// Load the TOML config file from the standard path
///
/// Returns `GittyConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> GittyConfigFile {
    config_file_path()
        .map(|path| load_config_file_from(&path))
        .unwrap_or_default()
}

/// Load a TOML config file from an explicit path
#[must_use]
pub fn load_config_file_from(path: &Path) -> GittyConfigFile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return GittyConfigFile::default(),
    };

    match toml::from_str(&contents) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config file");
            GittyConfigFile::default()
        }
    }
}
