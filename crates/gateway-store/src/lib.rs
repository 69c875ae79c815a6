//! # gateway-store
//!
//! The externally shared state tier: the TTL-bound session/replay store that
//! makes resumption work across gateway processes, and the Pub/Sub event bus
//! that decouples event producers from the processes holding live
//! connections.

pub mod bus;
pub mod pool;
pub mod session;

pub use bus::{
    BusError, EventBus, EventTargets, MemoryEventBus, PublishedEvent, RedisBusConfig,
    RedisEventBus, EVENT_BUS_CHANNEL,
};
pub use pool::{RedisPool, RedisPoolConfig, StoreError, StoreResult};
pub use session::{
    MemorySessionStore, RedisSessionStore, ReplayEntry, SessionData, SessionStore, REPLAY_LIMIT,
};
