//! Secrets API client error types.

use thiserror::Error;

/// Errors returned by a [`SecretsClient`](super::SecretsClient).
///
/// `InvalidToken` and `PermissionDenied` are deliberately separate variants:
/// the first means the credential itself is dead, the second means a live
/// credential lacks policy for one path.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The token was rejected outright (revoked, expired or unknown).
    #[error("invalid token")]
    InvalidToken,

    /// The token is valid but policy denies access to the path.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// Path that was denied
        path: String,
    },

    /// An authenticated operation was attempted without a token.
    #[error("missing client token")]
    MissingToken,

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error messages from the API, joined
        message: String,
    },

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Client address could not be parsed
    #[error("invalid address: {0}")]
    Address(#[from] url::ParseError),

    /// Capability not implemented by this client
    #[error("{0} is not supported by this client")]
    Unsupported(&'static str),
}

impl ClientError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Http(_) | ClientError::Api { status: 500..=599, .. }
        )
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, ClientError::InvalidToken | ClientError::MissingToken)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ClientError::PermissionDenied { .. })
    }
}
