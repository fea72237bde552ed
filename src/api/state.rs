//! Application state for shared services

use std::sync::Arc;

use crate::config::LimitsConfig;
use crate::domain::{ModelLoader, SessionRepository};
use crate::infrastructure::services::ClassificationService;

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub classification_service: Arc<ClassificationService>,
    pub limits: LimitsConfig,
}

impl AppState {
    pub fn new(classification_service: Arc<ClassificationService>, limits: LimitsConfig) -> Self {
        Self {
            classification_service,
            limits,
        }
    }

    /// Build the service graph from a session store and model loader
    pub fn from_parts(
        sessions: Arc<dyn SessionRepository>,
        loader: Arc<dyn ModelLoader>,
        limits: LimitsConfig,
    ) -> Self {
        Self::new(Arc::new(ClassificationService::new(sessions, loader)), limits)
    }
}
