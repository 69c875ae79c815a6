//! Reconnecting gateway client
//!
//! Runs as a background task and mirrors the server's per-connection state
//! machine: Hello, then Identify or Resume, then heartbeats on the declared
//! interval. Transient drops trigger backoff and (where the close code
//! allows) a Resume carrying the last acknowledged sequence number.

use crate::backoff::Backoff;
use crate::events::ClientEvent;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use gateway_protocol::{
    CloseCode, GatewayFrame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload,
    ResumedPayload,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway WebSocket URL (e.g., `ws://127.0.0.1:8081/gateway`)
    pub url: String,
    /// Authentication token presented at Identify/Resume
    pub token: String,
    /// First reconnection delay
    pub backoff_base: Duration,
    /// Reconnection delay cap
    pub backoff_max: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// What the client needs to resume a dropped session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: String,
    pub last_seq: u64,
}

/// Whether to try connecting again after a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectDecision {
    Retry,
    Stop,
}

/// Decide on reconnection from the close code
///
/// An absent or unrecognized code means the transport failed, not the
/// protocol; those are always retried.
fn reconnect_decision(close_code: Option<u16>) -> ReconnectDecision {
    match close_code.and_then(CloseCode::from_u16) {
        Some(code) if !code.should_reconnect() => ReconnectDecision::Stop,
        _ => ReconnectDecision::Retry,
    }
}

/// Whether resume state survives this close code
fn keep_resume_state(close_code: Option<u16>) -> bool {
    match close_code.and_then(CloseCode::from_u16) {
        Some(code) => code.can_resume(),
        None => true,
    }
}

/// The first client frame after Hello: Resume when state exists, Identify
/// otherwise
fn handshake_frame(token: &str, resume: Option<&ResumeState>) -> GatewayFrame {
    match resume {
        Some(state) => GatewayFrame::resume(&ResumePayload {
            token: token.to_string(),
            session_id: state.session_id.clone(),
            seq: state.last_seq,
        }),
        None => GatewayFrame::identify(&IdentifyPayload {
            token: token.to_string(),
        }),
    }
}

/// Handle to a running client
pub struct GatewayClient;

impl GatewayClient {
    /// Connect in the background and surface events on the returned channel
    ///
    /// The task stops when the close code is terminal or the receiver is
    /// dropped.
    pub fn connect(config: ClientConfig) -> (mpsc::Receiver<ClientEvent>, tokio::task::JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let handle = tokio::spawn(run(config, events_tx));
        (events_rx, handle)
    }
}

async fn run(config: ClientConfig, events: mpsc::Sender<ClientEvent>) {
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_max);
    let mut resume: Option<ResumeState> = None;

    loop {
        let close_code = match run_connection(&config, &mut resume, &events, &mut backoff).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(error = %e, "Connection attempt failed");
                None
            }
        };

        let terminal = reconnect_decision(close_code) == ReconnectDecision::Stop;
        if events
            .send(ClientEvent::Disconnected {
                code: close_code,
                terminal,
            })
            .await
            .is_err()
        {
            return;
        }
        if terminal {
            tracing::info!(code = ?close_code, "Terminal close code, giving up");
            return;
        }

        if !keep_resume_state(close_code) {
            tracing::debug!(code = ?close_code, "Discarding resume state");
            resume = None;
        }

        let delay = backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
}

/// Drive one connection until it drops
///
/// Returns the server's close code, or `None` for a transport-level loss.
async fn run_connection(
    config: &ClientConfig,
    resume: &mut Option<ResumeState>,
    events: &mpsc::Sender<ClientEvent>,
    backoff: &mut Backoff,
) -> Result<Option<u16>, ClientError> {
    let (ws, _) = connect_async(&config.url).await?;
    let (mut sink, mut stream) = ws.split();

    let heartbeat_interval = await_hello(&mut stream).await?;
    tracing::debug!(heartbeat_interval, "Hello received");

    send_frame(&mut sink, &handshake_frame(&config.token, resume.as_ref())).await?;

    let period = Duration::from_millis(heartbeat_interval);
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = GatewayFrame::from_json(&text) else {
                            tracing::debug!("Ignoring malformed server frame");
                            continue;
                        };
                        if frame.op == OpCode::HeartbeatAck {
                            awaiting_ack = false;
                            continue;
                        }
                        if let Some(code) = handle_server_frame(frame, resume, events, backoff).await? {
                            return Ok(code);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(frame.map(|f| u16::from(f.code)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Socket error");
                        return Ok(None);
                    }
                    None => return Ok(None),
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    // Server missed a full cycle; drop and resume
                    tracing::warn!("Heartbeat unacknowledged, reconnecting");
                    return Ok(None);
                }
                let last_seq = resume.as_ref().map(|s| s.last_seq);
                send_frame(&mut sink, &GatewayFrame::heartbeat(last_seq)).await?;
                awaiting_ack = true;
            }
        }
    }
}

/// React to one parsed server frame
///
/// `Ok(Some(code))` ends the connection with that close code; `Ok(None)`
/// keeps it running.
async fn handle_server_frame(
    frame: GatewayFrame,
    resume: &mut Option<ResumeState>,
    events: &mpsc::Sender<ClientEvent>,
    backoff: &mut Backoff,
) -> Result<Option<Option<u16>>, ClientError> {
    match frame.op {
        OpCode::Dispatch => {
            let event_type = frame.t.clone().unwrap_or_default();
            let data = frame.d.clone().unwrap_or_default();

            match event_type.as_str() {
                "READY" => {
                    let ready: ReadyPayload = serde_json::from_value(data)
                        .map_err(|e| ClientError::Protocol(format!("bad READY payload: {e}")))?;
                    *resume = Some(ResumeState {
                        session_id: ready.session_id.clone(),
                        last_seq: 0,
                    });
                    backoff.reset();
                    let _ = events.send(ClientEvent::Ready(ready)).await;
                }
                "RESUMED" => {
                    let resumed: ResumedPayload = serde_json::from_value(data)
                        .map_err(|e| ClientError::Protocol(format!("bad RESUMED payload: {e}")))?;
                    backoff.reset();
                    let _ = events.send(ClientEvent::Resumed(resumed)).await;
                }
                _ => {
                    if let (Some(seq), Some(state)) = (frame.s, resume.as_mut()) {
                        state.last_seq = seq;
                    }
                    let _ = events
                        .send(ClientEvent::Dispatch {
                            event_type,
                            seq: frame.s,
                            data,
                        })
                        .await;
                }
            }
            Ok(None)
        }
        OpCode::HeartbeatAck => Ok(None),
        OpCode::Reconnect => {
            // Server-requested reconnect; the session stays resumable
            tracing::info!("Server requested reconnect");
            Ok(Some(None))
        }
        OpCode::InvalidSession => {
            // The server closes right after this frame; dropping the resume
            // state here makes the next attempt a fresh Identify
            let resumable = frame.invalid_session_resumable().unwrap_or(false);
            tracing::info!(resumable, "Session invalidated by server");
            if !resumable {
                *resume = None;
            }
            Ok(None)
        }
        op => {
            tracing::debug!(op = %op, "Ignoring unexpected server opcode");
            Ok(None)
        }
    }
}

/// Wait for the Hello frame and return the declared heartbeat interval
async fn await_hello(
    stream: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Result<u64, ClientError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = GatewayFrame::from_json(&text)
                    .map_err(|e| ClientError::Protocol(format!("bad first frame: {e}")))?;
                if frame.op != OpCode::Hello {
                    return Err(ClientError::Protocol(format!(
                        "expected Hello, got {}",
                        frame.op
                    )));
                }
                let hello: HelloPayload = frame
                    .d
                    .and_then(|d| serde_json::from_value(d).ok())
                    .ok_or_else(|| ClientError::Protocol("Hello without interval".to_string()))?;
                return Ok(hello.heartbeat_interval);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(ClientError::Protocol(
                    "connection closed before Hello".to_string(),
                ))
            }
        }
    }
}

async fn send_frame(
    sink: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    frame: &GatewayFrame,
) -> Result<(), ClientError> {
    let json = frame.to_json()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
