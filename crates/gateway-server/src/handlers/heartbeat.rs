//! Heartbeat handler (op 1)
//!
//! Feeds the liveness clock, slides the session TTL, and acknowledges.

use crate::connection::Connection;
use crate::handlers::HandlerError;
use crate::server::GatewayState;
use gateway_protocol::GatewayFrame;
use std::sync::Arc;

pub async fn handle_heartbeat(
    state: &GatewayState,
    conn: &Arc<Connection>,
    _last_seq: Option<u64>,
) -> Result<(), HandlerError> {
    conn.record_heartbeat().await;

    // A heartbeat before Identify is still acknowledged, it just has no
    // session to keep alive yet.
    if let Some(session_id) = conn.session_id().await {
        if let Err(e) = state.store.refresh_ttl(&session_id).await {
            // Losing one refresh shortens the resume window, nothing more
            tracing::warn!(
                conn_id = %conn.conn_id(),
                session_id = %session_id,
                error = %e,
                "Failed to refresh session TTL"
            );
        }
    }

    let _ = conn.send_frame(&GatewayFrame::heartbeat_ack()).await;
    Ok(())
}
