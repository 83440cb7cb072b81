//! Error types for Gitty

use thiserror::Error;

/// Result type alias for Gitty operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of a raw model reply kept in diagnostics
pub const EXCERPT_CHARS: usize = 200;

/// Errors that can occur in the voice command pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access was refused by the OS or the user
    #[error("microphone permission denied: {0}")]
    MicrophoneDenied(String),

    /// Microphone is held by another component
    #[error("microphone is busy (held by {0})")]
    MicrophoneBusy(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Missing wake word credentials or model assets
    #[error("wake word assets unavailable: {0}")]
    WakeWordAssets(String),

    /// Inference service could not be reached or returned nothing usable
    #[error("inference error: {0}")]
    Inference(String),

    /// Inference service answered with a non-success status
    #[error("inference service returned status {status}: {body}")]
    InferenceStatus {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// No decoder strategy could salvage JSON from the model reply
    #[error("unparseable inference response: {excerpt}...")]
    UnparseableResponse {
        /// Leading part of the raw reply
        excerpt: String,
    },

    /// Decoded proposal is missing or mistypes a required field
    #[error("invalid command proposal: {0}")]
    Validation(String),

    /// A command is already awaiting confirmation
    #[error("a command is already pending confirmation: {0}")]
    PendingCommandExists(String),

    /// Command execution error
    #[error("execution error: {0}")]
    Execution(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure classes of the pipeline, used to decide how a failure is surfaced
///
/// Repository probe failures have no class: they degrade to defaults inside
/// the probe and never become an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone denied; ends the capture cycle
    Permission,
    /// Inference endpoint unreachable, non-success or malformed payload
    Service,
    /// Proposal missing required fields; handled like a service failure
    Validation,
    /// Wake word credentials or assets missing; disables arming only
    AssetConfig,
    /// Anything else (config, device, execution, local IO)
    Pipeline,
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MicrophoneDenied(_) => ErrorKind::Permission,
            Self::Inference(_)
            | Self::InferenceStatus { .. }
            | Self::UnparseableResponse { .. }
            | Self::Http(_) => ErrorKind::Service,
            Self::Validation(_) => ErrorKind::Validation,
            Self::WakeWordAssets(_) => ErrorKind::AssetConfig,
            Self::Config(_)
            | Self::Audio(_)
            | Self::MicrophoneBusy(_)
            | Self::Stt(_)
            | Self::WakeWord(_)
            | Self::PendingCommandExists(_)
            | Self::Execution(_)
            | Self::Io(_)
            | Self::Toml(_) => ErrorKind::Pipeline,
        }
    }

    /// Build an unparseable-response error carrying a truncated excerpt
    #[must_use]
    pub fn unparseable(raw: &str) -> Self {
        Self::UnparseableResponse {
            excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_excerpt_is_truncated() {
        let raw = "x".repeat(500);
        let Error::UnparseableResponse { excerpt } = Error::unparseable(&raw) else {
            panic!("wrong variant");
        };
        assert_eq!(excerpt.len(), EXCERPT_CHARS);
    }

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(
            Error::MicrophoneDenied("no".into()).kind(),
            ErrorKind::Permission
        );
        assert_eq!(
            Error::InferenceStatus {
                status: 500,
                body: String::new()
            }
            .kind(),
            ErrorKind::Service
        );
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::WakeWordAssets("x".into()).kind(),
            ErrorKind::AssetConfig
        );
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Pipeline);
    }
}
