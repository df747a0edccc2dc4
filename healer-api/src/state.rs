//! Shared application state for the API server.

use std::sync::Arc;

use healer::config::AgentConfig;
use healer::registry::Registry;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// All runs started by this process.
    pub registry: Registry,
    /// Validated agent configuration, loaded once at startup.
    pub config: Arc<AgentConfig>,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            registry: Registry::new(),
            config: Arc::new(config),
        }
    }
}
