//! Inbound frame handlers
//!
//! One function per client opcode, plus the router that picks one. Frames
//! that fail to parse and opcodes a client has no business sending are
//! dropped silently; a hostile or broken peer learns nothing and a healthy
//! connection is never torn down over line noise.

mod error;
mod heartbeat;
mod identify;
mod resume;

pub use error::HandlerError;

use crate::connection::Connection;
use crate::server::GatewayState;
use gateway_protocol::{CloseCode, GatewayFrame, OpCode};
use std::sync::Arc;

/// Route one inbound text frame
///
/// Returns the close code to terminate with, or `None` to keep the
/// connection open.
pub async fn handle_frame(
    state: &GatewayState,
    conn: &Arc<Connection>,
    text: &str,
) -> Option<CloseCode> {
    let frame = match GatewayFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(conn_id = %conn.conn_id(), error = %e, "Ignoring malformed frame");
            return None;
        }
    };

    let result = match frame.op {
        OpCode::Heartbeat => {
            let last_seq = frame.as_heartbeat_seq().unwrap_or(None);
            heartbeat::handle_heartbeat(state, conn, last_seq).await
        }
        OpCode::Identify => match frame.as_identify() {
            Some(payload) => identify::handle_identify(state, conn, payload).await,
            None => {
                tracing::debug!(conn_id = %conn.conn_id(), "Ignoring Identify with bad payload");
                Ok(())
            }
        },
        OpCode::Resume => match frame.as_resume() {
            Some(payload) => resume::handle_resume(state, conn, payload).await,
            None => {
                tracing::debug!(conn_id = %conn.conn_id(), "Ignoring Resume with bad payload");
                Ok(())
            }
        },
        // Server-to-client opcodes coming from a client
        op => {
            tracing::debug!(conn_id = %conn.conn_id(), op = %op, "Ignoring unexpected opcode");
            Ok(())
        }
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            let code = e.close_code();
            tracing::warn!(
                conn_id = %conn.conn_id(),
                error = %e,
                close_code = code.as_u16(),
                "Handler failed, closing connection"
            );
            Some(code)
        }
    }
}
