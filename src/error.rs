//! Error types for the load balancer
//!
//! `AppError` is the caller-facing taxonomy. Connector implementations report
//! failures with [`ConnectorError`], which the dispatcher treats as retryable.

use thiserror::Error;

/// Failure raised by a single connector invocation
///
/// Every variant is considered retryable by the dispatcher; the split only exists
/// so logs and events carry a useful message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("connector misconfigured: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unsupported hosting platform '{platform}' for model '{model}'")]
    UnsupportedPlatform { model: String, platform: String },

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("No eligible backend: all {total} configured backends are throttled")]
    NoEligibleBackend { total: usize },

    #[error("Invocation of {backend} failed on attempt {attempt}: {source}")]
    InvocationFailed {
        backend: String,
        attempt: usize,
        #[source]
        source: ConnectorError,
    },

    #[error("Backend {backend} throttled after {attempts} failed attempts")]
    BackendThrottled { backend: String, attempts: usize },

    #[error("Reviewer {backend} failed: {source}")]
    ReviewerInvocationFailed {
        backend: String,
        #[source]
        source: ConnectorError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<crate::backends::SelectionError> for AppError {
    fn from(err: crate::backends::SelectionError) -> Self {
        match err {
            crate::backends::SelectionError::NoEligibleBackend { total } => {
                AppError::NoEligibleBackend { total }
            }
        }
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
