use std::sync::Arc;

use crate::orchestrator::PodNetworkOrchestrator;
use crate::reconciler::ActiveWorkloadReconciler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PodNetworkOrchestrator>,
    pub reconciler: Arc<ActiveWorkloadReconciler>,
}

impl AppState {
    pub fn new(orchestrator: PodNetworkOrchestrator, reconciler: ActiveWorkloadReconciler) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            reconciler: Arc::new(reconciler),
        }
    }
}
