//! Per-socket connection state

mod connection;

pub use connection::{Connection, ConnectionState, Outbound};
