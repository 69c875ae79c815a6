//! Handler error to close code mapping

use gateway_common::AppError;
use gateway_protocol::CloseCode;
use gateway_store::StoreError;

/// Errors a frame handler can surface
///
/// Anything not worth closing the connection over (malformed payloads,
/// duplicate Identify) is handled inline and never reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Authentication failed: {0}")]
    Auth(#[source] AppError),

    #[error("Session missing, expired, or owned by another user")]
    SessionInvalid,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Membership resolution failed: {0}")]
    Membership(#[source] AppError),
}

impl HandlerError {
    /// The close code this error terminates the connection with
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Auth(_) => CloseCode::AuthenticationFailed,
            Self::SessionInvalid => CloseCode::InvalidSession,
            Self::Store(_) | Self::Membership(_) => CloseCode::InternalError,
        }
    }
}
