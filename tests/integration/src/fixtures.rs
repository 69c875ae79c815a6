//! Test fixtures
//!
//! The fixed world every gateway test runs against: two users sharing a DM
//! channel and a server, plus shortened protocol timings so liveness tests
//! finish in milliseconds.

use gateway_common::GatewayTimingConfig;
use gateway_protocol::Id;
use gateway_store::{EventTargets, PublishedEvent};

/// Signing secret used by every test gateway
pub const TEST_SECRET: &str = "integration-test-secret";

/// First test user
pub const ALICE: Id = Id::new(1);
/// Second test user
pub const BOB: Id = Id::new(2);
/// User with no memberships
pub const LONER: Id = Id::new(3);

/// DM channel shared by Alice and Bob
pub const DM_CHANNEL: Id = Id::new(100);
/// Server both users belong to
pub const SERVER: Id = Id::new(200);

/// Relaxed timings for tests that never heartbeat
///
/// Liveness cannot trip mid-test; sessions still expire within a minute.
#[must_use]
pub fn test_timing() -> GatewayTimingConfig {
    GatewayTimingConfig {
        heartbeat_interval_ms: 10_000,
        identify_timeout_ms: 5_000,
        session_ttl_secs: 60,
    }
}

/// Shrunk timings for liveness tests
///
/// Heartbeat timeout lands at 300ms (1.5x the interval); the identify
/// window is 300ms.
#[must_use]
pub fn fast_timing() -> GatewayTimingConfig {
    GatewayTimingConfig {
        heartbeat_interval_ms: 200,
        identify_timeout_ms: 300,
        session_ttl_secs: 60,
    }
}

/// A MESSAGE_CREATE aimed at the shared DM channel
#[must_use]
pub fn dm_message(content: &str) -> PublishedEvent {
    PublishedEvent::new(
        "MESSAGE_CREATE",
        serde_json::json!({ "channel_id": DM_CHANNEL, "content": content }),
        EventTargets::empty().with_channel(DM_CHANNEL),
    )
}

/// A TYPING_START in the shared channel, excluding the typist
#[must_use]
pub fn typing(typist: Id) -> PublishedEvent {
    PublishedEvent::typing_start(DM_CHANNEL, typist, serde_json::json!({ "user_id": typist }))
}
