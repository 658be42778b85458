//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use tessera_action::Orchestrator;
use tessera_core::config::TesseraConfig;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<TesseraConfig>,
    /// Bearer token for the `/internal` surface.
    pub internal_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: TesseraConfig, internal_token: String) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
            internal_token,
            start_time: Instant::now(),
        }
    }
}
