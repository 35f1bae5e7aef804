//! Crate-level error type.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are
//! grouped by [`ErrorKind`] so callers (the CLI and the web UI) can decide how
//! to present a failure without matching on every variant.

use thiserror::Error;

/// Minimum character count, after trimming, accepted for optimization.
pub const MIN_CONTENT_CHARS: usize = 10;

/// Broad failure classes surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input rejected before any network call.
    Validation,
    /// Missing secret or unreadable configuration.
    Configuration,
    /// Remote endpoint failed or its body could not be read.
    Transport,
    /// Durable storage could not be read or written.
    Persistence,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("content is too short to optimize: {len} characters, at least {} required", MIN_CONTENT_CHARS)]
    ContentTooShort { len: usize },

    #[error("API key is not configured; export {var} and try again")]
    MissingApiKey { var: &'static str },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse config file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("API request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unable to read response stream: {0}")]
    StreamRead(String),

    #[error("API returned empty optimized content")]
    EmptyContent,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ScribeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScribeError::ContentTooShort { .. } => ErrorKind::Validation,
            ScribeError::MissingApiKey { .. }
            | ScribeError::Config(_)
            | ScribeError::TomlParse(_) => ErrorKind::Configuration,
            ScribeError::Http { .. }
            | ScribeError::Transport(_)
            | ScribeError::StreamRead(_)
            | ScribeError::EmptyContent => ErrorKind::Transport,
            ScribeError::Io(_) | ScribeError::Json(_) | ScribeError::Sqlite(_) => {
                ErrorKind::Persistence
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;
