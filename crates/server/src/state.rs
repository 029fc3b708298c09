use std::sync::Arc;
use modreport_core::{AdmissionQueue, BridgeBrowser, Config, MessageRouter, ReportOrchestrator};

/// Shared application state
pub struct AppState {
    config: Config,
    queue: Arc<AdmissionQueue>,
    bridge: Arc<BridgeBrowser>,
    orchestrator: Arc<ReportOrchestrator>,
    router: Arc<MessageRouter>,
}

impl AppState {
    pub fn new(
        config: Config,
        queue: Arc<AdmissionQueue>,
        bridge: Arc<BridgeBrowser>,
        orchestrator: Arc<ReportOrchestrator>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            config,
            queue,
            bridge,
            orchestrator,
            router,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn bridge(&self) -> &Arc<BridgeBrowser> {
        &self.bridge
    }

    pub fn orchestrator(&self) -> &Arc<ReportOrchestrator> {
        &self.orchestrator
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }
}
