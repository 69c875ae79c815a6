//! Test helpers
//!
//! Spawns the gateway in-process over the in-memory store and bus, and wraps
//! a raw WebSocket in protocol-aware send/recv helpers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use gateway_common::{GatewayTimingConfig, JwtService};
use gateway_protocol::{GatewayFrame, Id, OpCode};
use gateway_server::auth::{JwtVerifier, StaticMembershipResolver};
use gateway_server::{create_app, spawn_event_pump, GatewayState};
use gateway_store::{MemoryEventBus, MemorySessionStore, PublishedEvent};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::fixtures::{test_timing, ALICE, BOB, DM_CHANNEL, SERVER, TEST_SECRET};

/// How long a test waits for any single frame
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// An in-process gateway bound to an ephemeral port
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: GatewayState,
    pub jwt: JwtService,
    _server: JoinHandle<()>,
    _pump: JoinHandle<()>,
}

impl TestGateway {
    /// Start with the relaxed default timings
    pub async fn start() -> Result<Self> {
        Self::start_with_timing(test_timing()).await
    }

    /// Start with custom timings
    pub async fn start_with_timing(timing: GatewayTimingConfig) -> Result<Self> {
        let jwt = JwtService::new(TEST_SECRET, 900);
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
            timing.session_ttl_secs,
        )));
        let bus = Arc::new(MemoryEventBus::new(256));
        let resolver = StaticMembershipResolver::new()
            .with_user(ALICE, vec![DM_CHANNEL], vec![SERVER])
            .with_user(BOB, vec![DM_CHANNEL], vec![SERVER]);

        let state = GatewayState::new(
            store,
            bus,
            Arc::new(JwtVerifier::new(jwt.clone())),
            Arc::new(resolver),
            timing,
        );
        let pump = spawn_event_pump(&state);

        let app = create_app(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            jwt,
            _server: server,
            _pump: pump,
        })
    }

    /// WebSocket URL of this gateway
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    /// HTTP base URL of this gateway
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Mint a valid token for a user
    pub fn token(&self, user_id: Id, username: &str) -> Result<String> {
        Ok(self.jwt.issue_access_token(user_id, username)?)
    }

    /// Publish an event onto the bus and give the pump a moment to fan out
    pub async fn publish(&self, event: &PublishedEvent) -> Result<()> {
        self.state.bus.publish(event).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(())
    }
}

/// A raw protocol-level WebSocket client
pub struct TestSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestSocket {
    /// Open a socket to the gateway
    pub async fn connect(gateway: &TestGateway) -> Result<Self> {
        let (ws, _) = connect_async(gateway.ws_url()).await?;
        Ok(Self { ws })
    }

    /// Send one frame
    pub async fn send_frame(&mut self, frame: &GatewayFrame) -> Result<()> {
        self.ws.send(Message::Text(frame.to_json()?)).await?;
        Ok(())
    }

    /// Send raw text (for malformed-input tests)
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive the next frame, failing on close or timeout
    pub async fn recv_frame(&mut self) -> Result<GatewayFrame> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for frame")?
                .context("socket ended")??;

            match msg {
                Message::Text(text) => return Ok(GatewayFrame::from_json(&text)?),
                Message::Close(frame) => bail!("socket closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Assert that nothing arrives within the given window
    pub async fn expect_silence(&mut self, window: Duration) -> Result<()> {
        match tokio::time::timeout(window, self.ws.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => bail!("unexpected frame: {text}"),
            Ok(other) => bail!("unexpected socket activity: {other:?}"),
        }
    }

    /// Read until the server closes, returning the close code
    pub async fn recv_close_code(&mut self) -> Result<Option<u16>> {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for close")?
            {
                Some(Ok(Message::Close(frame))) => {
                    return Ok(frame.map(|f| u16::from(f.code)));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Expect the Hello frame, returning the declared heartbeat interval
    pub async fn expect_hello(&mut self) -> Result<u64> {
        let frame = self.recv_frame().await?;
        if frame.op != OpCode::Hello {
            bail!("expected Hello, got {frame}");
        }
        frame
            .d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .context("Hello without heartbeat_interval")
    }

    /// Full fresh handshake: Hello, Identify, READY. Returns the READY
    /// payload.
    pub async fn identify(&mut self, token: &str) -> Result<serde_json::Value> {
        self.expect_hello().await?;
        self.send_frame(&GatewayFrame::identify(&gateway_protocol::IdentifyPayload {
            token: token.to_string(),
        }))
        .await?;

        let ready = self.recv_frame().await?;
        if ready.t.as_deref() != Some("READY") {
            bail!("expected READY, got {ready}");
        }
        ready.d.context("READY without payload")
    }

    /// Resume handshake after Hello. Returns the first frame the server
    /// answers with (replayed backlog, RESUMED, or Invalid Session).
    pub async fn resume(&mut self, token: &str, session_id: &str, seq: u64) -> Result<GatewayFrame> {
        self.expect_hello().await?;
        self.send_frame(&GatewayFrame::resume(&gateway_protocol::ResumePayload {
            token: token.to_string(),
            session_id: session_id.to_string(),
            seq,
        }))
        .await?;
        self.recv_frame().await
    }
}
