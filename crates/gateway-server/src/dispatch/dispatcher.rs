//! Fanout dispatcher
//!
//! Routes bus events to live connections. Three secondary indexes (channel,
//! server, user) map target ids to connection ids; an event matched by more
//! than one selector is still delivered exactly once per connection.

use crate::connection::{Connection, Outbound};
use crate::dispatch::{ReplayWrite, ReplayWriter};
use dashmap::DashMap;
use gateway_protocol::{GatewayFrame, Id};
use gateway_store::PublishedEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection registry and event router
pub struct Dispatcher {
    /// All registered connections by connection id
    connections: DashMap<String, Arc<Connection>>,

    /// channel id -> connection ids
    by_channel: DashMap<Id, HashSet<String>>,

    /// server id -> connection ids
    by_server: DashMap<Id, HashSet<String>>,

    /// user id -> connection ids (one user may hold several devices)
    by_user: DashMap<Id, HashSet<String>>,

    /// Background replay buffer writer
    replay: ReplayWriter,
}

impl Dispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new(replay: ReplayWriter) -> Self {
        Self {
            connections: DashMap::new(),
            by_channel: DashMap::new(),
            by_server: DashMap::new(),
            by_user: DashMap::new(),
            replay,
        }
    }

    /// Register an identified connection under its subscription snapshot
    ///
    /// Must be called after the connection's user id and subscriptions are
    /// set; events published before registration are not delivered live.
    pub async fn register(&self, conn: Arc<Connection>) {
        let conn_id = conn.conn_id().to_string();

        for channel_id in conn.channel_ids().await {
            self.by_channel
                .entry(channel_id)
                .or_default()
                .insert(conn_id.clone());
        }
        for server_id in conn.server_ids().await {
            self.by_server
                .entry(server_id)
                .or_default()
                .insert(conn_id.clone());
        }
        if let Some(user_id) = conn.user_id().await {
            self.by_user.entry(user_id).or_default().insert(conn_id.clone());
        }

        self.connections.insert(conn_id.clone(), conn);

        tracing::debug!(
            conn_id = %conn_id,
            total = self.connections.len(),
            "Connection registered"
        );
    }

    /// Remove a connection from the registry and all indexes
    pub async fn unregister(&self, conn_id: &str) {
        let Some((_, conn)) = self.connections.remove(conn_id) else {
            return;
        };

        for channel_id in conn.channel_ids().await {
            Self::prune(&self.by_channel, channel_id, conn_id);
        }
        for server_id in conn.server_ids().await {
            Self::prune(&self.by_server, server_id, conn_id);
        }
        if let Some(user_id) = conn.user_id().await {
            Self::prune(&self.by_user, user_id, conn_id);
        }

        tracing::debug!(
            conn_id = %conn_id,
            total = self.connections.len(),
            "Connection unregistered"
        );
    }

    fn prune(index: &DashMap<Id, HashSet<String>>, key: Id, conn_id: &str) {
        if let Some(mut set) = index.get_mut(&key) {
            set.remove(conn_id);
            if set.is_empty() {
                drop(set);
                index.remove_if(&key, |_, s| s.is_empty());
            }
        }
    }

    /// Number of registered connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver an event to every connection matched by its targets
    ///
    /// Each delivery assigns the connection's next sequence number and
    /// enqueues the exact sent frame for replay. Returns the number of
    /// connections the frame was handed to.
    pub async fn dispatch(&self, event: &PublishedEvent) -> usize {
        let target_ids = self.resolve_targets(event);
        if target_ids.is_empty() {
            return 0;
        }

        let excluded: HashSet<Id> = event.targets.exclude_user_ids.iter().copied().collect();

        let mut delivered = 0;
        for conn_id in target_ids {
            let Some(conn) = self.connections.get(&conn_id).map(|c| c.clone()) else {
                continue;
            };

            if let Some(user_id) = conn.user_id().await {
                if excluded.contains(&user_id) {
                    continue;
                }
            }

            let seq = conn.next_sequence();
            let frame = GatewayFrame::dispatch(&event.event_type, seq, event.data.clone());
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize dispatch frame");
                    continue;
                }
            };

            // Never wait on a single connection's outbound buffer; a peer
            // that stops reading must not stall fanout to everyone else.
            let sent = match conn.try_send(Outbound::Frame(json.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn_id = %conn_id, seq, "Outbound buffer full, frame dropped");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Writer task gone; the socket handler owns cleanup.
                    tracing::debug!(conn_id = %conn_id, "Dropping frame for closed connection");
                    false
                }
            };

            // The sequence number is already allocated, so the frame goes
            // into the replay buffer either way; a dropped delivery is
            // recoverable through Resume.
            if let Some(session_id) = conn.session_id().await {
                self.replay.enqueue(ReplayWrite {
                    session_id,
                    seq,
                    frame: json,
                });
            }

            if sent {
                delivered += 1;
            }
        }

        tracing::trace!(
            event_type = %event.event_type,
            delivered = delivered,
            "Event dispatched"
        );

        delivered
    }

    /// Union of all connections matched by the event's selectors
    fn resolve_targets(&self, event: &PublishedEvent) -> HashSet<String> {
        let mut target_ids = HashSet::new();

        if let Some(channel_id) = event.targets.channel_id {
            if let Some(set) = self.by_channel.get(&channel_id) {
                target_ids.extend(set.iter().cloned());
            }
        }
        if let Some(server_id) = event.targets.server_id {
            if let Some(set) = self.by_server.get(&server_id) {
                target_ids.extend(set.iter().cloned());
            }
        }
        for user_id in &event.targets.user_ids {
            if let Some(set) = self.by_user.get(user_id) {
                target_ids.extend(set.iter().cloned());
            }
        }

        target_ids
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connections", &self.connections.len())
            .field("channels", &self.by_channel.len())
            .field("servers", &self.by_server.len())
            .field("users", &self.by_user.len())
            .finish()
    }
}
