//! Error types for the UMA resource server

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the resource server
pub type Result<T> = std::result::Result<T, Error>;

/// Resource server errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No bearer token was presented; the client must obtain one using the
    /// ticket carried in the challenge.
    #[error("Unauthenticated")]
    Unauthenticated {
        /// Value for the `WWW-Authenticate` response header
        challenge: String,
    },

    /// The authorization server reported the presented token as inactive
    #[error("Token is not active")]
    TokenInvalid,

    /// Talking to the authorization server failed (network, timeout,
    /// unparseable response or a missing endpoint)
    #[error("Authorization server unavailable at {endpoint}: {reason}")]
    AuthorizationServerUnavailable {
        /// Endpoint (or metadata key) that was being used
        endpoint: String,
        /// Underlying cause
        reason: String,
    },

    /// The resource URI has already been written
    #[error("Resource already exists at {0}")]
    AlreadyExists(String),

    /// The key algorithm has no request-signing primitive
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Resource registration with the authorization server failed
    #[error("Resource registration failed: {0}")]
    Registration(String),

    /// Key-value store failure
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Key generation, parsing or signing failure
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::AuthorizationServerUnavailable`]
    pub fn unavailable(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::AuthorizationServerUnavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status used when this error reaches a client
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::TokenInvalid => StatusCode::FORBIDDEN,
            Self::AuthorizationServerUnavailable { .. } => StatusCode::BAD_GATEWAY,
            // Duplicate writes are reported as a non-error
            Self::AlreadyExists(_) => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
