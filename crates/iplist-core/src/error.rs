//! Error types for the IP list sync system
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for IP list sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the IP list sync system
#[derive(Error, Debug)]
pub enum Error {
    /// Source feed could not be fetched or parsed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Remote list could not be read completely
    #[error("Read error: {0}")]
    Read(String),

    /// Bulk mutation failed
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    /// Cache store read/write failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or socket errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP failures (connection, timeout, 5xx)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The remote API asked us to slow down
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided wait, if any
        retry_after: Option<Duration>,
    },

    /// List or account not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request was understood but refused (bad payload, invalid entry, ...)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Failure of the rate-limited mutation client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Still throttled after the bounded number of retries
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited {
        /// Number of calls issued, including the first
        attempts: u32,
        /// Retry-after hint from the last throttling response
        retry_after: Option<Duration>,
    },

    /// Non-transient refusal: authentication, unknown list, malformed payload
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or server-side failure
    #[error("transport: {0}")]
    Transport(String),
}

impl MutationError {
    /// Classify a non-throttling provider error
    pub fn classify(err: Error) -> Self {
        match err {
            Error::Http(_) | Error::Io(_) => Self::Transport(err.to_string()),
            Error::RateLimited { retry_after } => Self::RateLimited {
                attempts: 1,
                retry_after,
            },
            Error::Mutation(inner) => inner,
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a read error
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a throttling signal
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_not_rejections() {
        let err = MutationError::classify(Error::http("connection reset"));
        assert!(matches!(err, MutationError::Transport(_)));

        let err = MutationError::classify(Error::auth("bad token"));
        assert!(matches!(err, MutationError::Rejected(_)));

        let err = MutationError::classify(Error::not_found("list gone"));
        assert!(matches!(err, MutationError::Rejected(_)));
    }
}
