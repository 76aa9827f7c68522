//! Error types for ryt-decipher

use crate::platform::locator::RoutineKind;
use thiserror::Error;

/// Main error type for deciphering operations
#[derive(Debug, Error)]
pub enum DecipherError {
    #[error("Could not locate {0} routine")]
    ExtractionFailure(RoutineKind),

    #[error("Failed to compile {kind} routine: {message}")]
    CompileFailure { kind: RoutineKind, message: String },

    #[error("Failed to run {kind} routine: {message}")]
    RuntimeFailure { kind: RoutineKind, message: String },

    #[error("Script fetch failed: {0}")]
    FetchFailed(#[from] reqwest::Error),

    #[error("Script fetch returned status {status} for {url}")]
    FetchStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl DecipherError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            DecipherError::FetchFailed(err) => err.is_timeout() || err.is_connect(),
            DecipherError::FetchStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Routine the error was raised for, if any
    pub fn routine(&self) -> Option<RoutineKind> {
        match self {
            DecipherError::ExtractionFailure(kind)
            | DecipherError::CompileFailure { kind, .. }
            | DecipherError::RuntimeFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
