//! Identify handler (op 2)
//!
//! Authenticates the connection, resolves its subscription snapshot, mints a
//! session, and answers with READY.

use crate::connection::{Connection, ConnectionState};
use crate::handlers::HandlerError;
use crate::server::GatewayState;
use gateway_protocol::{GatewayFrame, IdentifyPayload, ReadyPayload, UserPayload};
use gateway_store::SessionData;
use std::sync::Arc;

pub async fn handle_identify(
    state: &GatewayState,
    conn: &Arc<Connection>,
    payload: IdentifyPayload,
) -> Result<(), HandlerError> {
    if conn.state().await != ConnectionState::AwaitingIdentify {
        // Already identified; a duplicate Identify is ignored, not fatal
        tracing::warn!(conn_id = %conn.conn_id(), "Ignoring duplicate Identify");
        return Ok(());
    }

    let user = state
        .verifier
        .verify(&payload.token)
        .await
        .map_err(HandlerError::Auth)?;

    let memberships = state
        .resolver
        .resolve(user.user_id)
        .await
        .map_err(HandlerError::Membership)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = SessionData::new(
        session_id.clone(),
        user.user_id,
        user.username.clone(),
        memberships.channel_ids.clone(),
        memberships.server_ids.clone(),
    );
    state.store.create(&session).await?;

    conn.set_user_id(user.user_id).await;
    conn.set_session_id(session_id.clone()).await;
    conn.set_subscriptions(memberships.channel_ids.clone(), memberships.server_ids.clone())
        .await;
    conn.record_heartbeat().await;
    conn.set_state(ConnectionState::Identified).await;

    // READY does not consume a sequence number; the first dispatched event
    // after it carries s=1.
    let ready = ReadyPayload {
        session_id: session_id.clone(),
        user: UserPayload {
            id: user.user_id,
            username: user.username,
        },
        server_ids: memberships.server_ids,
        dm_channel_ids: memberships.channel_ids,
    };
    let frame = GatewayFrame::dispatch_unsequenced(
        gateway_protocol::EventType::Ready.as_str(),
        serde_json::to_value(&ready).unwrap_or_default(),
    );
    let _ = conn.send_frame(&frame).await;

    // Register after READY so live dispatches cannot overtake it
    state.dispatcher.register(conn.clone()).await;

    tracing::info!(
        conn_id = %conn.conn_id(),
        session_id = %session_id,
        user_id = %ready.user.id,
        "Connection identified"
    );

    Ok(())
}
