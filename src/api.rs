//! HTTP API for sqlgraph

mod handlers;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::config::AgentConfig;
use crate::llm::ModelRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub llm_registry: Arc<ModelRegistry>,
    pub agent: Arc<AgentConfig>,
    /// Cancelled on shutdown; every question runs under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(llm_registry: Arc<ModelRegistry>, agent: AgentConfig) -> Self {
        Self {
            llm_registry,
            agent: Arc::new(agent),
            shutdown: CancellationToken::new(),
        }
    }
}
