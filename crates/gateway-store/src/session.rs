//! Session and replay storage.
//!
//! Sessions are the durable half of a connection: they live in a store every
//! gateway process can reach, expire on a TTL instead of being deleted on
//! disconnect, and carry the bounded replay buffer that fills gaps on Resume.

use crate::pool::{RedisPool, StoreResult};
use async_trait::async_trait;
use gateway_protocol::Id;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Key prefix for sessions
const SESSION_PREFIX: &str = "gw_session:";
/// Key prefix for session replay buffers
const REPLAY_PREFIX: &str = "gw_replay:";

/// Maximum replay entries kept per session
pub const REPLAY_LIMIT: usize = 500;

/// Stored session data
///
/// The subscription snapshot is fixed at Identify time; Resume deliberately
/// reuses it without re-resolving memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Opaque session id minted at Identify
    pub session_id: String,
    /// User this session belongs to
    pub user_id: Id,
    /// Username at Identify time
    pub username: String,
    /// DM channels the session is subscribed to
    pub channel_ids: Vec<Id>,
    /// Servers the session is subscribed to
    pub server_ids: Vec<Id>,
    /// Last sequence number mirrored from the live connection (opportunistic,
    /// may lag the replay buffer)
    pub last_seq: u64,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: i64,
}

impl SessionData {
    /// Create a new session record
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        user_id: Id,
        username: impl Into<String>,
        channel_ids: Vec<Id>,
        server_ids: Vec<Id>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            username: username.into(),
            channel_ids,
            server_ids,
            last_seq: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One replayable dispatch: the sequence number and the frame exactly as it
/// was sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub seq: u64,
    pub frame: String,
}

/// Shared session/replay store
///
/// Implementations must be safe for concurrent access from many gateway
/// processes; every operation is an atomic per-key step.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a session with the configured TTL, replacing any previous record
    async fn create(&self, session: &SessionData) -> StoreResult<()>;

    /// Fetch a session by id
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionData>>;

    /// Slide the session's (and its replay buffer's) expiry without
    /// rewriting the record
    async fn refresh_ttl(&self, session_id: &str) -> StoreResult<()>;

    /// Remove a session and its replay buffer
    async fn delete(&self, session_id: &str) -> StoreResult<()>;

    /// Opportunistically mirror the connection's sequence counter
    async fn update_last_seq(&self, session_id: &str, seq: u64) -> StoreResult<()>;

    /// Append a dispatched frame to the replay buffer, trimming to the most
    /// recent [`REPLAY_LIMIT`] entries
    async fn append_replay(&self, session_id: &str, seq: u64, frame: &str) -> StoreResult<()>;

    /// Fetch replay entries with `seq > after_seq`, oldest first
    ///
    /// Entries that fell out of the bounded window are simply absent; no gap
    /// marker is produced.
    async fn replay_after(&self, session_id: &str, after_seq: u64) -> StoreResult<Vec<ReplayEntry>>;
}

/// Redis-backed session store
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: RedisPool,
    ttl_secs: u64,
}

impl RedisSessionStore {
    /// Create a new store over the given pool
    #[must_use]
    pub fn new(pool: RedisPool, ttl_secs: u64) -> Self {
        Self { pool, ttl_secs }
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_PREFIX}{session_id}")
    }

    fn replay_key(session_id: &str) -> String {
        format!("{REPLAY_PREFIX}{session_id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &SessionData) -> StoreResult<()> {
        let key = Self::session_key(&session.session_id);
        self.pool.set(&key, session, Some(self.ttl_secs)).await?;

        tracing::debug!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            ttl = self.ttl_secs,
            "Session stored"
        );

        Ok(())
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionData>> {
        self.pool.get_value(&Self::session_key(session_id)).await
    }

    async fn refresh_ttl(&self, session_id: &str) -> StoreResult<()> {
        self.pool
            .expire(&Self::session_key(session_id), self.ttl_secs)
            .await?;
        // Replay buffer tracks the session's lifetime
        self.pool
            .expire(&Self::replay_key(session_id), self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        self.pool.delete(&Self::session_key(session_id)).await?;
        self.pool.delete(&Self::replay_key(session_id)).await?;

        tracing::debug!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    async fn update_last_seq(&self, session_id: &str, seq: u64) -> StoreResult<()> {
        // Read-modify-write without a transaction: last_seq is an
        // opportunistic mirror, the live connection's counter stays
        // authoritative.
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(());
        };
        session.last_seq = seq;

        let key = Self::session_key(session_id);
        let serialized = serde_json::to_string(&session)?;
        let mut conn = self.pool.get().await?;
        redis::cmd("SET")
            .arg(&key)
            .arg(&serialized)
            .arg("KEEPTTL")
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn append_replay(&self, session_id: &str, seq: u64, frame: &str) -> StoreResult<()> {
        let key = Self::replay_key(session_id);
        let entry = ReplayEntry {
            seq,
            frame: frame.to_string(),
        };
        let serialized = serde_json::to_string(&entry)?;

        let mut conn = self.pool.get().await?;
        conn.lpush::<_, _, ()>(&key, &serialized).await?;
        conn.ltrim::<_, ()>(&key, 0, (REPLAY_LIMIT - 1) as isize).await?;
        conn.expire::<_, ()>(&key, self.ttl_secs as i64).await?;

        Ok(())
    }

    async fn replay_after(&self, session_id: &str, after_seq: u64) -> StoreResult<Vec<ReplayEntry>> {
        let key = Self::replay_key(session_id);
        let mut conn = self.pool.get().await?;

        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;
        let mut entries = Vec::new();

        // Entries are stored newest-first; reverse to delivery order and
        // skip anything unparseable rather than failing the resume.
        for item in raw.into_iter().rev() {
            if let Ok(entry) = serde_json::from_str::<ReplayEntry>(&item) {
                if entry.seq > after_seq {
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }
}

struct MemorySession {
    data: SessionData,
    replay: VecDeque<ReplayEntry>,
    expires_at: Instant,
}

/// In-process session store
///
/// Drop-in double for [`RedisSessionStore`] used by tests and local
/// development; same TTL and trimming semantics, no external process.
pub struct MemorySessionStore {
    inner: Mutex<HashMap<String, MemorySession>>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// Create a store with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn purge_expired(map: &mut HashMap<String, MemorySession>, session_id: &str) {
        if let Some(entry) = map.get(session_id) {
            if entry.expires_at <= Instant::now() {
                map.remove(session_id);
            }
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &SessionData) -> StoreResult<()> {
        let mut map = self.inner.lock();
        map.insert(
            session.session_id.clone(),
            MemorySession {
                data: session.clone(),
                replay: VecDeque::new(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionData>> {
        let mut map = self.inner.lock();
        Self::purge_expired(&mut map, session_id);
        Ok(map.get(session_id).map(|e| e.data.clone()))
    }

    async fn refresh_ttl(&self, session_id: &str) -> StoreResult<()> {
        let mut map = self.inner.lock();
        Self::purge_expired(&mut map, session_id);
        if let Some(entry) = map.get_mut(session_id) {
            entry.expires_at = Instant::now() + self.ttl;
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        self.inner.lock().remove(session_id);
        Ok(())
    }

    async fn update_last_seq(&self, session_id: &str, seq: u64) -> StoreResult<()> {
        let mut map = self.inner.lock();
        Self::purge_expired(&mut map, session_id);
        if let Some(entry) = map.get_mut(session_id) {
            entry.data.last_seq = seq;
        }
        Ok(())
    }

    async fn append_replay(&self, session_id: &str, seq: u64, frame: &str) -> StoreResult<()> {
        let mut map = self.inner.lock();
        Self::purge_expired(&mut map, session_id);
        if let Some(entry) = map.get_mut(session_id) {
            entry.replay.push_back(ReplayEntry {
                seq,
                frame: frame.to_string(),
            });
            while entry.replay.len() > REPLAY_LIMIT {
                entry.replay.pop_front();
            }
            entry.expires_at = Instant::now() + self.ttl;
        }
        Ok(())
    }

    async fn replay_after(&self, session_id: &str, after_seq: u64) -> StoreResult<Vec<ReplayEntry>> {
        let mut map = self.inner.lock();
        Self::purge_expired(&mut map, session_id);
        Ok(map
            .get(session_id)
            .map(|e| {
                e.replay
                    .iter()
                    .filter(|entry| entry.seq > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.inner.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
