//! Error types for HexTask.

use thiserror::Error as ThisError;

/// Top-level error type for the client.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Configuration-related errors.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reported by the backend data service (rows, auth endpoints, storage).
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ApiError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Backend returned {status} for {endpoint}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),
}

/// Session errors.
#[derive(Debug, ThisError)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Auth request failed: {0}")]
    Backend(#[from] ApiError),
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
