//! Cross-process event bus.
//!
//! Event producers publish `{event_type, data, targets}` onto one shared
//! named channel; every gateway process subscribes and feeds its own
//! dispatcher identically, so a single publish fans out correctly no matter
//! which process holds the target connections.

use futures_util::StreamExt;
use gateway_protocol::Id;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::pool::RedisPool;

/// The shared Pub/Sub channel every gateway process listens on
pub const EVENT_BUS_CHANNEL: &str = "gateway:events";

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(#[from] crate::pool::StoreError),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus is shut down")]
    Closed,
}

/// Target selectors attached to a published event
///
/// Any subset may be present simultaneously; the dispatcher deduplicates
/// connections matched by more than one selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTargets {
    /// Deliver to connections subscribed to this channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Id>,
    /// Deliver to connections subscribed to this server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Id>,
    /// Deliver to every connection of these users
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub user_ids: Vec<Id>,
    /// Users to skip even when matched (e.g., the acting user)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exclude_user_ids: Vec<Id>,
}

impl EventTargets {
    /// Create an empty target set
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Target a channel
    #[must_use]
    pub fn with_channel(mut self, channel_id: Id) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    /// Target a server
    #[must_use]
    pub fn with_server(mut self, server_id: Id) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Target a user directly
    #[must_use]
    pub fn with_user(mut self, user_id: Id) -> Self {
        self.user_ids.push(user_id);
        self
    }

    /// Exclude a user from delivery
    #[must_use]
    pub fn exclude_user(mut self, user_id: Id) -> Self {
        self.exclude_user_ids.push(user_id);
        self
    }

    /// True when no selector is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.server_id.is_none() && self.user_ids.is_empty()
    }
}

/// An event published onto the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Event type name (e.g., "MESSAGE_CREATE")
    pub event_type: String,
    /// Event payload
    pub data: Value,
    /// Routing selectors
    #[serde(default)]
    pub targets: EventTargets,
}

impl PublishedEvent {
    /// Create a new event
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value, targets: EventTargets) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            targets,
        }
    }

    /// MESSAGE_CREATE targeting a channel and (optionally) its server
    #[must_use]
    pub fn message_create(channel_id: Id, server_id: Option<Id>, data: Value) -> Self {
        let mut targets = EventTargets::empty().with_channel(channel_id);
        if let Some(server_id) = server_id {
            targets = targets.with_server(server_id);
        }
        Self::new(gateway_protocol::EventType::MessageCreate.as_str(), data, targets)
    }

    /// TYPING_START targeting a channel, skipping the typist
    #[must_use]
    pub fn typing_start(channel_id: Id, typist: Id, data: Value) -> Self {
        Self::new(
            gateway_protocol::EventType::TypingStart.as_str(),
            data,
            EventTargets::empty().with_channel(channel_id).exclude_user(typist),
        )
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Cross-process event bus
///
/// `publish` is fire-and-forget from the producer's point of view; delivery
/// failures surface only in gateway logs.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to every subscribed gateway process
    async fn publish(&self, event: &PublishedEvent) -> Result<(), BusError>;

    /// Get a receiver fed with every event published on the bus
    fn subscribe(&self) -> broadcast::Receiver<PublishedEvent>;
}

/// Redis bus configuration
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    /// Broadcast buffer size
    pub broadcast_buffer: usize,
    /// Reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            broadcast_buffer: 1024,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Redis Pub/Sub event bus
///
/// A background task holds the subscription and pushes parsed events into a
/// broadcast channel; it reconnects with a fixed delay if the connection
/// drops. A malformed message is logged and dropped, never crashes the loop.
pub struct RedisEventBus {
    pool: RedisPool,
    redis_url: String,
    broadcast_tx: broadcast::Sender<PublishedEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl RedisEventBus {
    /// Create the bus and start the background listener
    pub fn new(pool: RedisPool, redis_url: impl Into<String>, config: RedisBusConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let url = redis_url.into();
        tokio::spawn(Self::listener_loop(
            url.clone(),
            config,
            broadcast_tx.clone(),
            shutdown_rx,
        ));

        Self {
            pool,
            redis_url: url,
            broadcast_tx,
            shutdown_tx,
        }
    }

    /// Stop the background listener
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn listener_loop(
        redis_url: String,
        config: RedisBusConfig,
        broadcast_tx: broadcast::Sender<PublishedEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Event bus listener shutting down");
                return;
            }

            match Self::run_listener(&redis_url, &broadcast_tx, &mut shutdown_rx).await {
                Ok(()) => {
                    tracing::info!("Event bus listener shutting down");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event bus listener error, reconnecting...");
                    tokio::time::sleep(tokio::time::Duration::from_millis(
                        config.reconnect_delay_ms,
                    ))
                    .await;
                }
            }
        }
    }

    /// Run the subscription until error or shutdown; Ok means shutdown
    async fn run_listener(
        redis_url: &str,
        broadcast_tx: &broadcast::Sender<PublishedEvent>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        let client = redis::Client::open(redis_url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(EVENT_BUS_CHANNEL).await?;

        tracing::info!(channel = EVENT_BUS_CHANNEL, "Event bus subscribed");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload: String = msg.get_payload().unwrap_or_default();
                            match serde_json::from_str::<PublishedEvent>(&payload) {
                                Ok(event) => {
                                    tracing::trace!(
                                        event_type = %event.event_type,
                                        "Received bus event"
                                    );
                                    // No receivers is fine
                                    let _ = broadcast_tx.send(event);
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        error = %e,
                                        "Dropping malformed bus message"
                                    );
                                }
                            }
                        }
                        None => {
                            tracing::warn!("Event bus stream ended");
                            return Err(BusError::Closed);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), BusError> {
        let payload = event.to_json()?;
        let mut conn = self.pool.get().await.map_err(BusError::Store)?;

        let receivers: u32 = conn.publish(EVENT_BUS_CHANNEL, &payload).await?;

        tracing::debug!(
            event_type = %event.event_type,
            receivers = receivers,
            "Published event"
        );

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.broadcast_tx.subscribe()
    }
}

impl std::fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let safe_url = self.redis_url.split('@').next_back().unwrap_or(&self.redis_url);
        f.debug_struct("RedisEventBus").field("url", &safe_url).finish()
    }
}

/// In-process event bus
///
/// Drop-in double for [`RedisEventBus`]: publish goes straight into the
/// broadcast channel. Used by tests and single-process deployments.
pub struct MemoryEventBus {
    broadcast_tx: broadcast::Sender<PublishedEvent>,
}

impl MemoryEventBus {
    /// Create a bus with the given buffer size
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer);
        Self { broadcast_tx }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), BusError> {
        // No receivers is fine
        let _ = self.broadcast_tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.broadcast_tx.subscribe()
    }
}
