//! # gateway-client
//!
//! Reconnecting client for the real-time gateway: mirrors the server's
//! connection state machine, heartbeats on the declared interval, resumes
//! after transient drops, and surfaces everything as a stream of
//! [`ClientEvent`]s.

pub mod backoff;
pub mod client;
pub mod events;

pub use backoff::Backoff;
pub use client::{ClientConfig, ClientError, GatewayClient, ResumeState};
pub use events::ClientEvent;
