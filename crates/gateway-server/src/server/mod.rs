//! Gateway server assembly
//!
//! Router construction, production wiring, the bus-to-dispatcher pump, and
//! the run loop.

mod handler;
mod state;

pub use state::GatewayState;

use crate::auth::{HttpMembershipResolver, JwtVerifier};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use gateway_common::{AppConfig, AppError, AppResult, JwtService};
use gateway_store::{RedisBusConfig, RedisEventBus, RedisPool, RedisSessionStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Build the axum application
pub fn create_app(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(handler::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.dispatcher.connection_count(),
    }))
}

/// Wire up production state: Redis store, Redis bus, JWT verification, and
/// the HTTP membership resolver
pub fn create_gateway_state(config: &AppConfig) -> AppResult<GatewayState> {
    let pool = RedisPool::from_config(&config.redis).map_err(|e| AppError::Store(e.to_string()))?;

    let store = Arc::new(RedisSessionStore::new(
        pool.clone(),
        config.timing.session_ttl_secs,
    ));
    let bus = Arc::new(RedisEventBus::new(
        pool,
        config.redis.url.clone(),
        RedisBusConfig::default(),
    ));

    let jwt = JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry);
    let verifier = Arc::new(JwtVerifier::new(jwt));
    let resolver = Arc::new(HttpMembershipResolver::new(config.membership_base_url.clone()));

    Ok(GatewayState::new(store, bus, verifier, resolver, config.timing))
}

/// Pump bus events into the dispatcher until the bus closes
///
/// A lagged receiver drops the overrun and keeps going; affected clients
/// recover through the replay buffer on their next Resume.
pub fn spawn_event_pump(state: &GatewayState) -> tokio::task::JoinHandle<()> {
    let mut events = state.bus.subscribe();
    let dispatcher = state.dispatcher.clone();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    dispatcher.dispatch(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Event pump lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, pump stopping");
                    break;
                }
            }
        }
    })
}

/// Run the gateway server until the process is stopped
pub async fn run(config: AppConfig) -> AppResult<()> {
    let state = create_gateway_state(&config)?;
    spawn_event_pump(&state);

    let app = create_app(state);
    let address = config.gateway.address();

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::Internal(format!("failed to bind {address}: {e}")))?;

    tracing::info!(address = %address, "Gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("server error: {e}")))
}
