// Error handling module
// Defines client error types surfaced to application code

use thiserror::Error;

/// Reasons a session can no longer be authenticated.
///
/// Cloneable so a single renewal failure can be handed to every caller
/// that was queued behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No refresh token is stored
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Renewal endpoint answered with a non-success status
    #[error("Token renewal rejected: {status} - {message}")]
    RenewalRejected { status: u16, message: String },

    /// Renewal call could not complete
    #[error("Token renewal failed: {0}")]
    RenewalFailed(String),

    /// Renewal endpoint answered with an unusable body
    #[error("Token renewal response invalid: {0}")]
    MalformedRenewal(String),

    /// Request was still unauthorized after one renewal
    #[error("Request still unauthorized after token renewal")]
    StillUnauthorized,

    /// The renewal in flight was dropped before it settled
    #[error("Token renewal was abandoned before completing")]
    Abandoned,
}

/// Errors that can occur while talking to the remote API
#[derive(Error, Debug)]
pub enum ClientError {
    /// Session is over: credentials cleared, login redirect issued
    #[error("Authentication expired: {0}")]
    AuthenticationExpired(#[from] AuthError),

    /// Logical endpoint path is missing or names a group
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    /// Error response from the remote API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::AuthenticationExpired(_) => Some(401),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the error ends the current session
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::AuthenticationExpired(_))
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
