//! Error types for the OAuth token manager

use thiserror::Error;

use crate::auth::token::StorageError;

/// Main error type for OAuth operations
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Unknown provider or unusable provider configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// State token missing, expired, already redeemed, or bound to another provider
    #[error("Invalid state")]
    InvalidState,

    /// Token endpoint unreachable or returned a non-2xx response
    #[error("Network error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Network {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Transport error or (truncated) response body
        message: String,
    },

    /// Token file could not be written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local callback listener could not be bound
    #[error("Callback listener error: {0}")]
    Listener(String),

    /// Provider redirected back with an `error` parameter
    #[error("Authorization failed: {error}{}", .description.as_ref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Authorization {
        /// Provider error code (e.g. `access_denied`)
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// Waiting for the provider redirect took too long
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller aborted the flow
    #[error("Authentication cancelled")]
    Cancelled,
}

/// Result type alias for OAuth operations
pub type Result<T> = std::result::Result<T, OAuthError>;

impl OAuthError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a network error
    pub fn network(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Network {
            status,
            message: msg.into(),
        }
    }

    /// Create a listener error
    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    /// Create an authorization error from the redirect parameters
    pub fn authorization(error: impl Into<String>, description: Option<String>) -> Self {
        Self::Authorization {
            error: error.into(),
            description,
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
