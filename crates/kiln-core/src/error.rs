//! Error types for kiln

use thiserror::Error;

/// The main error type for kiln operations.
///
/// Every failure that crosses a component boundary is classified into one of
/// these variants so callers can tell fatal outcomes from retryable ones.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} did not complete within {waited_secs} seconds")]
    Timeout { job_id: String, waited_secs: u64 },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("No geometry file found: {0}")]
    NoGeometryFound(String),

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Provider error {code}: {message} (request_id={request_id:?})")]
    Provider {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Cancelled while waiting for job {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),
}

impl KilnError {
    /// Whether the failure is connection-level and worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, KilnError::TransientNetwork(_))
    }
}

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        KilnError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for KilnError {
    fn from(err: toml::ser::Error) -> Self {
        KilnError::TomlSerError(err.to_string())
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Serialization(err.to_string())
    }
}
