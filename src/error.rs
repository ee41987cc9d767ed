//! Application error types for hostsync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;

use thiserror::Error;

/// Authentication and token-lifecycle errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Stored credentials can no longer be refreshed; the host must redo
    /// the authorization flow. Fatal for the current sync cycle.
    #[error("Integration requires reconnection")]
    ReauthRequired,

    /// Marketplace client credentials are not configured
    #[error("Marketplace credentials not configured")]
    MissingCredentials,

    /// Token decryption or encryption failed
    #[error("Token cipher error: {0}")]
    Cipher(String),

    /// Storage failure while loading or persisting tokens
    #[error("Token storage error: {0}")]
    Storage(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection error
    #[error("Database error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Errors surfaced by calls to the marketplace API
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by the marketplace (HTTP 429)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error (HTTP 5xx)
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Unauthorized (HTTP 401/403) - access token expired or revoked
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// The remote side already holds a committed booking (HTTP 409)
    #[error("Conflict: remote calendar already committed")]
    Conflict,

    /// Invalid data received or rejected by the marketplace
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// OAuth callback errors, one distinct reason code per failure mode so the
/// frontend can render an actionable message
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallbackError {
    /// The state parameter could not be decoded
    #[error("Invalid state parameter")]
    InvalidState,

    /// The authorization code was rejected by the marketplace
    #[error("Invalid or expired authorization code: {0}")]
    InvalidCode(String),

    /// The redirect URI did not match the one used to obtain the code
    #[error("Redirect URI mismatch")]
    RedirectMismatch,

    /// A scope-extension flow completed without the required capability
    #[error("Granted scope is missing required capability: {0}")]
    ScopeMissing(String),

    /// No integration could be resolved to attach the tokens to
    #[error("No integration found to attach tokens to")]
    NoIntegration,

    /// Storage failure during callback processing
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Webhook ingestion errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WebhookError {
    /// Payload was not valid JSON or lacked required identifiers
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    /// Storage failure while applying the event
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Config file error: {0}")]
    FileRead(String),

    /// Failed to parse configuration
    #[error("Config parse error: {0}")]
    Parse(String),

    /// A required value is missing or invalid
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Application-level error type
///
/// Aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Marketplace API error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// OAuth callback error
    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    /// Webhook error
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Server-supplied wait hint, if any (e.g. a Retry-After header)
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServerError(code) if *code >= 500 => true,
            SyncError::Network(_) => true,

            // Non-retryable errors
            SyncError::Unauthorized => false,
            SyncError::NotFound => false,
            SyncError::Conflict => false,
            SyncError::InvalidData(_) => false,
            SyncError::ServerError(_) => false, // 4xx errors
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl SyncError {
    /// HTTP status code associated with this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::RateLimited(_) => Some(429),
            SyncError::ServerError(code) => Some(*code),
            SyncError::Unauthorized => Some(401),
            SyncError::NotFound => Some(404),
            SyncError::Conflict => Some(409),
            _ => None,
        }
    }
}
