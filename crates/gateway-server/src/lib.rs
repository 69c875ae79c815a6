//! # gateway-server
//!
//! WebSocket gateway holding long-lived client connections and fanning out
//! events published on the shared bus.

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod server;

pub use server::{create_app, create_gateway_state, run, spawn_event_pump, GatewayState};
