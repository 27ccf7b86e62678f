//! Application state shared across handlers.

use std::sync::Arc;

use crate::backend::GenerationBackend;
use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;

use super::registry::SessionRegistry;

/// Read-only process state plus the shared stream registry.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn GenerationBackend>,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn GenerationBackend>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let sessions = SessionRegistry::new(config.server.max_streams);
        Self {
            config: Arc::new(config),
            backend,
            sessions,
            shutdown,
        }
    }
}
