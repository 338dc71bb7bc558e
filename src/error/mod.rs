//! Error types for Tycho.

use thiserror::Error;

/// Primary error type for all Tycho operations.
#[derive(Error, Debug)]
pub enum TychoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No sandbox registered for session: {0}")]
    SandboxNotFound(String),

    #[error("Sandbox backend error (status {status}): {message}")]
    SandboxBackend { status: u16, message: String },

    #[error("Structured output failed after {attempts} attempts. Last error: {last_error}")]
    StructuredOutput { attempts: u32, last_error: String },

    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TychoError {
    /// Create a sandbox backend error from an HTTP status and response body.
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::SandboxBackend {
            status,
            message: message.into(),
        }
    }

    /// Create an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

/// Substrings that mark an engine failure as transient.
///
/// These are matched against the raw error text the engine produced, so a
/// caller can safely re-issue the turn when the terminal `error` event is
/// tagged retryable.
const TRANSIENT_SIGNATURES: &[&str] = &["rate_limit", "overloaded", "timeout"];

/// Classify an engine failure message as transient (retryable) or fatal.
pub fn is_transient(message: &str) -> bool {
    TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig))
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TychoError>;
