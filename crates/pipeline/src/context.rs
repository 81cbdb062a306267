//! Shared pipeline context.

use crate::registry::{GrabbagClassifier, NameHeuristicClassifier};
use cubehouse_core::config::AppConfig;
use cubehouse_core::LabelNormalizer;
use cubehouse_metadata::WarehouseStore;
use cubehouse_storage::ContentStore;
use cubehouse_wds::WdsApi;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Everything a pipeline phase needs, threaded explicitly.
///
/// One context is built per CLI invocation and shared by reference across
/// worker tasks.
pub struct PipelineContext {
    pub warehouse: Arc<dyn WarehouseStore>,
    pub content: Arc<ContentStore>,
    pub wds: Arc<dyn WdsApi>,
    pub normalizer: Arc<dyn LabelNormalizer>,
    pub grabbag: Arc<dyn GrabbagClassifier>,
    pub config: AppConfig,
    phase_lock: Mutex<()>,
}

impl PipelineContext {
    pub fn new(
        warehouse: Arc<dyn WarehouseStore>,
        content: Arc<ContentStore>,
        wds: Arc<dyn WdsApi>,
        normalizer: Arc<dyn LabelNormalizer>,
        config: AppConfig,
    ) -> Self {
        Self {
            warehouse,
            content,
            wds,
            normalizer,
            grabbag: Arc::new(NameHeuristicClassifier),
            config,
            phase_lock: Mutex::new(()),
        }
    }

    /// Swap the grab-bag heuristic; the default is the English name match.
    pub fn with_grabbag_classifier(mut self, classifier: Arc<dyn GrabbagClassifier>) -> Self {
        self.grabbag = classifier;
        self
    }

    /// Advisory lock for exclusive phases (spine loader, registry
    /// builder): blocks their re-entry but not the fetch loops.
    pub async fn phase_guard(&self) -> MutexGuard<'_, ()> {
        self.phase_lock.lock().await
    }
}
