//! Application state for the ingestion server

use std::sync::Arc;

use crate::config::IngestConfig;
use crate::processing::{FileProcessor, QueueScanner, StatusStore};
use crate::providers::VectorStoreProvider;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: IngestConfig,
    /// File processor shared with the scan loop
    processor: Arc<FileProcessor>,
    /// Scanner used to answer pending-file queries
    scanner: Arc<QueueScanner>,
}

impl AppState {
    pub fn new(config: IngestConfig, processor: Arc<FileProcessor>, scanner: Arc<QueueScanner>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                processor,
                scanner,
            }),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    pub fn processor(&self) -> &Arc<FileProcessor> {
        &self.inner.processor
    }

    pub fn scanner(&self) -> &Arc<QueueScanner> {
        &self.inner.scanner
    }

    pub fn status(&self) -> &Arc<StatusStore> {
        self.inner.processor.status_store()
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStoreProvider> {
        self.inner.processor.vector_store()
    }
}
