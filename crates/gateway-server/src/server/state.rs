//! Shared gateway state

use crate::auth::{MembershipResolver, TokenVerifier};
use crate::dispatch::{Dispatcher, ReplayWriter};
use gateway_common::config::GatewayTimingConfig;
use gateway_store::{EventBus, SessionStore};
use std::sync::Arc;

/// State shared by every socket handler
#[derive(Clone)]
pub struct GatewayState {
    /// Shared session/replay store
    pub store: Arc<dyn SessionStore>,
    /// Cross-process event bus
    pub bus: Arc<dyn EventBus>,
    /// In-process fanout dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Identify/Resume token verifier
    pub verifier: Arc<dyn TokenVerifier>,
    /// Identify-time membership resolver
    pub resolver: Arc<dyn MembershipResolver>,
    /// Protocol timing knobs
    pub timing: GatewayTimingConfig,
}

impl GatewayState {
    /// Assemble the state and its replay writer
    pub fn new(
        store: Arc<dyn SessionStore>,
        bus: Arc<dyn EventBus>,
        verifier: Arc<dyn TokenVerifier>,
        resolver: Arc<dyn MembershipResolver>,
        timing: GatewayTimingConfig,
    ) -> Self {
        let replay = ReplayWriter::spawn(store.clone(), 4096);
        let dispatcher = Arc::new(Dispatcher::new(replay));

        Self {
            store,
            bus,
            dispatcher,
            verifier,
            resolver,
            timing,
        }
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("dispatcher", &self.dispatcher)
            .field("timing", &self.timing)
            .finish()
    }
}
