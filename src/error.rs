use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal startup problems. Raised before any document is read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API credentials configured (set QUIZIFY_API_KEYS or QUIZIFY_API_KEY)")]
    MissingCredentials,

    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("read config file {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("chunk size ({chunk_size}) must be greater than overlap ({overlap})")]
    InvalidWindow { chunk_size: usize, overlap: usize },
}

/// Transient oracle failures. All of them are retried.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("oracle API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("oracle returned empty output")]
    EmptyOutput,
}

/// The oracle answered, but nothing usable could be recovered from its text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    #[error("response is empty")]
    Empty,

    #[error("response contains no JSON array or object")]
    NoArray,

    #[error("response is malformed after repair: {0}")]
    Malformed(String),

    #[error("response is neither an array nor an object")]
    NotArray,

    #[error("response was cut off before any complete item")]
    Truncated,
}

/// Why a single attempt (call, then repair and parse) failed.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Malformed(#[from] RepairError),
}
