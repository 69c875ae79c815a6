//! Resume handler (op 4)
//!
//! Re-attaches a dropped session: verifies the token, restores the stored
//! subscription snapshot without re-resolving memberships, answers RESUMED,
//! and replays the frames the client missed.

use crate::connection::{Connection, ConnectionState, Outbound};
use crate::handlers::HandlerError;
use crate::server::GatewayState;
use gateway_protocol::{GatewayFrame, ResumePayload, ResumedPayload};
use std::sync::Arc;

pub async fn handle_resume(
    state: &GatewayState,
    conn: &Arc<Connection>,
    payload: ResumePayload,
) -> Result<(), HandlerError> {
    if conn.state().await != ConnectionState::AwaitingIdentify {
        tracing::warn!(conn_id = %conn.conn_id(), "Ignoring Resume on identified connection");
        return Ok(());
    }

    let user = state
        .verifier
        .verify(&payload.token)
        .await
        .map_err(HandlerError::Auth)?;

    let Some(session) = state.store.get(&payload.session_id).await? else {
        // Session expired or never existed. The InvalidSession frame goes
        // out before the close so the client knows to discard its resume
        // state and Identify fresh on the next attempt.
        tracing::info!(
            conn_id = %conn.conn_id(),
            session_id = %payload.session_id,
            "Resume rejected, session not found"
        );
        let _ = conn.send_frame(&GatewayFrame::invalid_session(false)).await;
        return Err(HandlerError::SessionInvalid);
    };

    if session.user_id != user.user_id {
        let _ = conn.send_frame(&GatewayFrame::invalid_session(false)).await;
        return Err(HandlerError::SessionInvalid);
    }

    state.store.refresh_ttl(&payload.session_id).await?;

    // The connection counter resumes from whichever side saw more: the
    // opportunistic mirror in the store or the client's acknowledgment.
    let mut resume_seq = session.last_seq.max(payload.seq);
    conn.set_user_id(session.user_id).await;
    conn.set_session_id(session.session_id.clone()).await;
    conn.set_subscriptions(session.channel_ids.clone(), session.server_ids.clone())
        .await;
    conn.record_heartbeat().await;
    conn.set_state(ConnectionState::Identified).await;

    // Replay the backlog first, exactly as originally dispatched; anything
    // older than the bounded buffer is silently gone.
    let entries = state.store.replay_after(&payload.session_id, payload.seq).await?;
    let replayed = entries.len();
    for entry in entries {
        resume_seq = resume_seq.max(entry.seq);
        let _ = conn.send(Outbound::Frame(entry.frame)).await;
    }
    conn.set_sequence(resume_seq);

    let resumed = ResumedPayload {
        session_id: session.session_id.clone(),
    };
    let frame = GatewayFrame::dispatch_unsequenced(
        gateway_protocol::EventType::Resumed.as_str(),
        serde_json::to_value(&resumed).unwrap_or_default(),
    );
    let _ = conn.send_frame(&frame).await;

    // Register only after the backlog and RESUMED so live traffic cannot
    // interleave with either
    state.dispatcher.register(conn.clone()).await;

    tracing::info!(
        conn_id = %conn.conn_id(),
        session_id = %session.session_id,
        user_id = %session.user_id,
        from_seq = payload.seq,
        resume_seq = resume_seq,
        replayed = replayed,
        "Connection resumed"
    );

    Ok(())
}
