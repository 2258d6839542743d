use std::sync::Arc;

use crate::core::config::Settings;
use crate::repositories::AssessmentStore;
use crate::services::attempt_orchestrator::AttemptOrchestrator;
use crate::services::certificate_issuer::CertificateIssuer;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn AssessmentStore>,
    orchestrator: AttemptOrchestrator,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn AssessmentStore>,
        orchestrator: AttemptOrchestrator,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, orchestrator }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn AssessmentStore> {
        &self.inner.store
    }

    pub(crate) fn orchestrator(&self) -> &AttemptOrchestrator {
        &self.inner.orchestrator
    }

    pub(crate) fn certificates(&self) -> &CertificateIssuer {
        self.inner.orchestrator.issuer()
    }
}
