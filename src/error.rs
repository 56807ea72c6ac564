//! Error handling for perimeter-sentry

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Wiring-level error types
///
/// Stage-specific errors (capture, verify, alert, link) carry their own typed
/// enums so the orchestrator can branch on transience; this enum covers
/// construction and plumbing failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serial link error
    #[error("Link error: {0}")]
    Link(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
