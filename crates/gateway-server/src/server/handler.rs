//! WebSocket connection lifecycle
//!
//! One socket becomes one [`Connection`], two tasks, and a liveness clock:
//! the reader task (this function) routes inbound frames, a spawned writer
//! task drains the outbound channel, and a ticker enforces the identify
//! window and the heartbeat bound.

use crate::connection::{Connection, ConnectionState, Outbound};
use crate::handlers;
use crate::server::GatewayState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use gateway_protocol::{CloseCode, GatewayFrame, HelloPayload};
use std::time::Duration;
use tokio::sync::mpsc;

/// Outbound channel depth per connection. A reader slower than this has
/// frames dropped (recoverable through the replay buffer on Resume) rather
/// than stalling the dispatcher.
const OUTBOUND_BUFFER: usize = 256;

/// WebSocket upgrade endpoint
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let conn = Connection::new(conn_id.clone(), outbound_tx);

    tracing::debug!(conn_id = %conn_id, "Connection opened");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx));

    // Hello goes out before anything is read
    let hello = GatewayFrame::hello(HelloPayload::with_interval(state.timing.heartbeat_interval_ms));
    if conn.send_frame(&hello).await.is_err() {
        tracing::debug!(conn_id = %conn_id, "Connection gone before Hello");
        return;
    }

    let identify_timeout = Duration::from_millis(state.timing.identify_timeout_ms);
    let heartbeat_timeout = Duration::from_millis(state.timing.heartbeat_timeout_ms());

    // Check liveness a few times per window so shortened test timings
    // still trip promptly.
    let tick = (state.timing.identify_timeout_ms.min(state.timing.heartbeat_timeout_ms()) / 4)
        .clamp(25, 5_000);
    let mut liveness = tokio::time::interval(Duration::from_millis(tick));
    liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let close_code = loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(code) = handlers::handle_frame(&state, &conn, &text).await {
                            break Some(code);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(conn_id = %conn_id, "Client closed connection");
                        break None;
                    }
                    // Binary frames are not part of the protocol; pings are
                    // answered by the transport layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Socket error");
                        break None;
                    }
                }
            }
            _ = liveness.tick() => {
                if !conn.is_identified().await {
                    if conn.age() >= identify_timeout {
                        tracing::info!(conn_id = %conn_id, "Identify window elapsed");
                        break Some(CloseCode::IdentifyTimeout);
                    }
                } else if conn.time_since_heartbeat().await >= heartbeat_timeout {
                    tracing::info!(conn_id = %conn_id, "Heartbeat missed, closing");
                    break Some(CloseCode::HeartbeatTimeout);
                }
            }
        }
    };

    if let Some(code) = close_code {
        // Best effort: on a backed-up buffer the close handshake is skipped
        // and the socket is simply dropped below.
        let _ = conn.try_send(Outbound::Close(code));
    }

    conn.set_state(ConnectionState::Closed).await;
    state.dispatcher.unregister(&conn_id).await;

    // The session record stays in the store on purpose: its TTL is the
    // resume window.

    drop(conn);
    let _ = writer.await;

    tracing::debug!(conn_id = %conn_id, "Connection closed");
}

async fn write_outbound(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(message) = outbound_rx.recv().await {
        match message {
            Outbound::Frame(json) => {
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            Outbound::Close(code) => {
                let (code, reason) = GatewayFrame::close_frame(code);
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
