//! Application state.

use std::sync::Arc;

use ppe_worker::{JobExecutor, JobRegistry, VideoProcessor, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub registry: JobRegistry,
    pub processor: Arc<VideoProcessor>,
    pub executor: Arc<JobExecutor>,
}

impl AppState {
    /// Assemble state around a loaded processor and a running executor.
    pub fn new(config: ApiConfig, processor: Arc<VideoProcessor>, executor: Arc<JobExecutor>) -> Self {
        Self {
            config,
            registry: processor.registry().clone(),
            processor,
            executor,
        }
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        self.processor.config()
    }
}
