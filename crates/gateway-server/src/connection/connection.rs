//! Individual WebSocket connection
//!
//! Process-local, in-memory state for one live socket. The session half
//! lives in the shared store; this half owns the authoritative sequence
//! counter and the heartbeat clock.

use gateway_protocol::{CloseCode, GatewayFrame, Id};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, Hello sent, waiting for Identify or Resume
    AwaitingIdentify,
    /// Successfully identified or resumed
    Identified,
    /// Connection is closed
    Closed,
}

/// Message for the outbound writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized gateway frame to send as text
    Frame(String),
    /// Close the socket with the given code
    Close(CloseCode),
}

/// A single live connection
pub struct Connection {
    /// Process-local connection id (registry key, not the session id)
    conn_id: String,

    /// Session id, set at Identify or Resume
    session_id: RwLock<Option<String>>,

    /// Authenticated user id (None until Identify/Resume)
    user_id: RwLock<Option<Id>>,

    /// Current connection state
    state: RwLock<ConnectionState>,

    /// Channel to the outbound writer task
    sender: mpsc::Sender<Outbound>,

    /// Last sequence number assigned to this connection. Strictly
    /// increasing, never reset, continues across Resume.
    sequence: AtomicU64,

    /// Last heartbeat (or identify) observed
    last_heartbeat: RwLock<Instant>,

    /// Channels this connection is subscribed to (index membership, kept so
    /// unregister is O(subscriptions))
    channel_ids: RwLock<HashSet<Id>>,

    /// Servers this connection is subscribed to
    server_ids: RwLock<HashSet<Id>>,

    /// Connection creation time
    created_at: Instant,
}

impl Connection {
    /// Create a new connection in `AwaitingIdentify`
    pub fn new(conn_id: String, sender: mpsc::Sender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            conn_id,
            session_id: RwLock::new(None),
            user_id: RwLock::new(None),
            state: RwLock::new(ConnectionState::AwaitingIdentify),
            sender,
            sequence: AtomicU64::new(0),
            last_heartbeat: RwLock::new(Instant::now()),
            channel_ids: RwLock::new(HashSet::new()),
            server_ids: RwLock::new(HashSet::new()),
            created_at: Instant::now(),
        })
    }

    /// Get the connection id
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Get the session id (if identified)
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Set the session id
    pub async fn set_session_id(&self, session_id: String) {
        *self.session_id.write().await = Some(session_id);
    }

    /// Get the user id (if identified)
    pub async fn user_id(&self) -> Option<Id> {
        *self.user_id.read().await
    }

    /// Set the user id
    pub async fn set_user_id(&self, user_id: Id) {
        *self.user_id.write().await = Some(user_id);
    }

    /// Get the current state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Set the connection state
    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Check if the connection has completed Identify or Resume
    pub async fn is_identified(&self) -> bool {
        *self.state.read().await == ConnectionState::Identified
    }

    /// Allocate the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Set the sequence number (Resume continuation point)
    pub fn set_sequence(&self, seq: u64) {
        self.sequence.store(seq, Ordering::SeqCst);
    }

    /// Record a heartbeat (also called at Identify/Resume to arm liveness)
    pub async fn record_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    /// Time since the last recorded heartbeat
    pub async fn time_since_heartbeat(&self) -> std::time::Duration {
        self.last_heartbeat.read().await.elapsed()
    }

    /// Install the subscription snapshot (fixed until the next full Identify)
    pub async fn set_subscriptions(&self, channel_ids: Vec<Id>, server_ids: Vec<Id>) {
        *self.channel_ids.write().await = channel_ids.into_iter().collect();
        *self.server_ids.write().await = server_ids.into_iter().collect();
    }

    /// Subscribed channel ids
    pub async fn channel_ids(&self) -> Vec<Id> {
        self.channel_ids.read().await.iter().copied().collect()
    }

    /// Subscribed server ids
    pub async fn server_ids(&self) -> Vec<Id> {
        self.server_ids.read().await.iter().copied().collect()
    }

    /// Connection age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Send an outbound message to the writer task
    pub async fn send(&self, message: Outbound) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(message).await
    }

    /// Send without waiting
    ///
    /// Fails when the outbound buffer is full or the writer task is gone.
    /// The fanout path uses this so one backed-up connection cannot stall
    /// delivery to the others.
    pub fn try_send(&self, message: Outbound) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.sender.try_send(message)
    }

    /// Serialize and send a frame
    pub async fn send_frame(
        &self,
        frame: &GatewayFrame,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        match frame.to_json() {
            Ok(json) => self.send(Outbound::Frame(json)).await,
            // Serialization of our own frames cannot fail in practice;
            // treat it as a dropped frame rather than a dead connection.
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Failed to serialize frame");
                Ok(())
            }
        }
    }

    /// Check if the writer task is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("conn_id", &self.conn_id)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_creation() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("conn1".to_string(), tx);

        assert_eq!(conn.conn_id(), "conn1");
        assert!(conn.session_id().await.is_none());
        assert!(conn.user_id().await.is_none());
        assert_eq!(conn.state().await, ConnectionState::AwaitingIdentify);
        assert!(!conn.is_identified().await);
    }

    #[tokio::test]
    async fn test_connection_identify_transition() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("conn1".to_string(), tx);

        conn.set_session_id("session123".to_string()).await;
        conn.set_user_id(Id::new(42)).await;
        conn.set_state(ConnectionState::Identified).await;

        assert!(conn.is_identified().await);
        assert_eq!(conn.session_id().await.as_deref(), Some("session123"));
        assert_eq!(conn.user_id().await, Some(Id::new(42)));
    }

    #[tokio::test]
    async fn test_connection_sequence() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("conn1".to_string(), tx);

        assert_eq!(conn.current_sequence(), 0);
        assert_eq!(conn.next_sequence(), 1);
        assert_eq!(conn.next_sequence(), 2);
        assert_eq!(conn.current_sequence(), 2);

        conn.set_sequence(100);
        assert_eq!(conn.next_sequence(), 101);
    }

    #[tokio::test]
    async fn test_connection_subscriptions() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("conn1".to_string(), tx);

        conn.set_subscriptions(vec![Id::new(1)], vec![Id::new(2), Id::new(3)])
            .await;

        assert_eq!(conn.channel_ids().await.len(), 1);
        assert_eq!(conn.server_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_send_frame() {
        let (tx, mut rx) = mpsc::channel(10);
        let conn = Connection::new("conn1".to_string(), tx);

        conn.send_frame(&GatewayFrame::heartbeat_ack()).await.unwrap();

        match rx.recv().await.unwrap() {
            Outbound::Frame(json) => assert!(json.contains("\"op\":3")),
            Outbound::Close(_) => panic!("expected frame"),
        }
    }
}
