use std::io;

/// Errors raised while talking to a VCS provider
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to {method} {url}, status code: {status}, body: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("retries exceeded after {attempts} attempts, last status code {status} and body {body:?}")]
    RetryExhausted {
        attempts: usize,
        status: u16,
        body: String,
    },

    #[error("failed to refresh oauth token: {0}")]
    Refresh(String),

    #[error("invalid repository id: {0}")]
    InvalidRepository(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl VcsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VcsError::NotFound(_))
    }
}

/// Custom error type for the GitOps pipeline
#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use GitOpsError
pub type Result<T> = std::result::Result<T, GitOpsError>;
