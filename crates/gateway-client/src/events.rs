//! Events surfaced to the application

use gateway_protocol::{ReadyPayload, ResumedPayload};
use serde_json::Value;

/// What the client reports to the application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Fresh session established
    Ready(ReadyPayload),

    /// Dropped session re-attached; replayed frames arrive as ordinary
    /// `Dispatch` events
    Resumed(ResumedPayload),

    /// A dispatched event. `seq` is absent for lifecycle dispatches.
    Dispatch {
        event_type: String,
        seq: Option<u64>,
        data: Value,
    },

    /// Connection lost; the client will reconnect unless `terminal`
    Disconnected {
        /// Close code, if the server sent one
        code: Option<u16>,
        /// No further attempts will be made
        terminal: bool,
    },
}
