//! Payload definitions
//!
//! Payload structures carried in the `d` field of gateway frames, shared by
//! the server and client.

use crate::Id;
use serde::{Deserialize, Serialize};

/// Payload for op 7 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    /// Default heartbeat interval (45 seconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 45_000;

    /// Create a new Hello payload with the default interval
    #[must_use]
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Create a Hello payload with a custom interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to authenticate a fresh session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,
}

/// Payload for op 4 (Resume)
///
/// Sent by the client to re-establish a dropped session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// User identity carried in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: Id,
    pub username: String,
}

/// READY dispatch payload, sent after a successful Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Newly minted session id, used for later Resume
    pub session_id: String,
    /// The authenticated user
    pub user: UserPayload,
    /// Servers the session is subscribed to
    pub server_ids: Vec<Id>,
    /// Direct-message channels the session is subscribed to
    pub dm_channel_ids: Vec<Id>,
}

/// RESUMED dispatch payload, sent after a successful Resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumedPayload {
    /// The resumed session id
    pub session_id: String,
}
