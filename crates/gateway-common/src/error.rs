//! Application error types
//!
//! Unified error handling across the gateway crates.

use crate::config::ConfigError;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // Event bus errors
    #[error("Event bus error: {0}")]
    Bus(String),

    // External collaborator errors
    #[error("External service error: {0}")]
    ExternalService(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Application-wide result type
pub type AppResult<T> = Result<T, AppError>;
