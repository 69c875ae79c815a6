//! Integration test utilities for the gateway
//!
//! Helpers for spawning an in-process gateway over the in-memory store and
//! bus, minting tokens, and driving raw WebSocket clients through the
//! protocol.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
