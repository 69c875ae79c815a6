//! Socket close codes
//!
//! One distinct code per failure class so clients can branch on the reason
//! without parsing the close reason text.

use serde::{Deserialize, Serialize};

/// Gateway close codes
///
/// Sent when closing a connection to indicate the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Unexpected server-side failure (includes store unavailability)
    InternalError = 4000,
    /// Token verification failed
    AuthenticationFailed = 4004,
    /// Resume target missing, expired, or owned by another user
    InvalidSession = 4006,
    /// Neither Identify nor Resume arrived within the identify window
    IdentifyTimeout = 4008,
    /// Liveness check failed (missed heartbeat cycle)
    HeartbeatTimeout = 4009,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::InternalError),
            4004 => Some(Self::AuthenticationFailed),
            4006 => Some(Self::InvalidSession),
            4008 => Some(Self::IdentifyTimeout),
            4009 => Some(Self::HeartbeatTimeout),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the client should attempt to reconnect after this close code
    ///
    /// Authentication failure is terminal: retrying with the same token would
    /// fail the same way.
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        matches!(
            self,
            Self::InternalError | Self::InvalidSession | Self::IdentifyTimeout | Self::HeartbeatTimeout
        )
    }

    /// Check if the client may keep its resume state after this close code
    ///
    /// An invalid session means the server no longer knows the session, so
    /// the next attempt must be a fresh Identify.
    #[must_use]
    pub const fn can_resume(self) -> bool {
        matches!(self, Self::InternalError | Self::HeartbeatTimeout)
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InternalError => "Internal server error",
            Self::AuthenticationFailed => "Authentication failed",
            Self::InvalidSession => "Invalid session",
            Self::IdentifyTimeout => "Identify timeout",
            Self::HeartbeatTimeout => "Heartbeat timeout",
        }
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InternalError => "InternalError",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::InvalidSession => "InvalidSession",
            Self::IdentifyTimeout => "IdentifyTimeout",
            Self::HeartbeatTimeout => "HeartbeatTimeout",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(4000), Some(CloseCode::InternalError));
        assert_eq!(CloseCode::from_u16(4004), Some(CloseCode::AuthenticationFailed));
        assert_eq!(CloseCode::from_u16(4006), Some(CloseCode::InvalidSession));
        assert_eq!(CloseCode::from_u16(4008), Some(CloseCode::IdentifyTimeout));
        assert_eq!(CloseCode::from_u16(4009), Some(CloseCode::HeartbeatTimeout));
        assert_eq!(CloseCode::from_u16(1000), None);
        assert_eq!(CloseCode::from_u16(4001), None);
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            CloseCode::InternalError,
            CloseCode::AuthenticationFailed,
            CloseCode::InvalidSession,
            CloseCode::IdentifyTimeout,
            CloseCode::HeartbeatTimeout,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a.as_u16(), b.as_u16());
            }
        }
    }

    #[test]
    fn test_should_reconnect() {
        assert!(CloseCode::InternalError.should_reconnect());
        assert!(CloseCode::InvalidSession.should_reconnect());
        assert!(CloseCode::IdentifyTimeout.should_reconnect());
        assert!(CloseCode::HeartbeatTimeout.should_reconnect());
        assert!(!CloseCode::AuthenticationFailed.should_reconnect());
    }

    #[test]
    fn test_can_resume() {
        assert!(CloseCode::InternalError.can_resume());
        assert!(CloseCode::HeartbeatTimeout.can_resume());
        assert!(!CloseCode::InvalidSession.can_resume());
        assert!(!CloseCode::AuthenticationFailed.can_resume());
    }

    #[test]
    fn test_close_code_display() {
        let display = format!("{}", CloseCode::AuthenticationFailed);
        assert!(display.contains("4004"));
        assert!(display.contains("Authentication"));
    }
}
