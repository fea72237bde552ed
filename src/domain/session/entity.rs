//! Per-session state driven by the UI handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::classifier::{ModelHandle, ModelInfo};
use crate::domain::labels::ClassLabels;
use crate::domain::preprocessing::PreprocessingConfig;
use crate::domain::DomainError;

/// Session identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| DomainError::invalid_id(format!("'{}' is not a valid session id", value)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one user session holds between requests
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
    model: Option<ModelHandle>,
    model_loaded: bool,
    labels: ClassLabels,
    preprocessing: PreprocessingConfig,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            model: None,
            model_loaded: false,
            labels: ClassLabels::default(),
            preprocessing: PreprocessingConfig::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn preprocessing(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Model to run inference with; only available after a successful load
    pub fn active_model(&self) -> Result<&ModelHandle, DomainError> {
        match (&self.model, self.model_loaded) {
            (Some(model), true) => Ok(model),
            _ => Err(DomainError::model_not_loaded(
                "Upload a model before classifying images",
            )),
        }
    }

    /// Replace the model wholesale after a successful load
    pub fn replace_model(&mut self, model: ModelHandle) {
        self.model = Some(model);
        self.model_loaded = true;
        self.last_error = None;
        self.touch();
    }

    /// Record a failed load; the previous handle is left as it was
    pub fn mark_load_failed(&mut self, message: impl Into<String>) {
        self.model_loaded = false;
        self.last_error = Some(message.into());
        self.touch();
    }

    pub fn set_labels(&mut self, labels: ClassLabels) {
        self.labels = labels;
        self.touch();
    }

    pub fn set_preprocessing(&mut self, preprocessing: PreprocessingConfig) {
        self.preprocessing = preprocessing;
        self.touch();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            model_loaded: self.model_loaded,
            model: self
                .model
                .as_ref()
                .filter(|_| self.model_loaded)
                .map(|m| m.info().clone()),
            labels: self.labels.clone(),
            preprocessing: self.preprocessing,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Read-only view of a session for API responses
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    pub labels: ClassLabels,
    pub preprocessing: PreprocessingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session context shared between requests; one request at a time holds it
pub type SharedSession = Arc<Mutex<SessionContext>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::testing::FixedClassifier;

    #[test]
    fn test_new_session_defaults() {
        let session = SessionContext::new(SessionId::generate());

        assert!(!session.model_loaded());
        assert!(session.model().is_none());
        assert_eq!(session.labels().len(), 5);
        assert_eq!(session.preprocessing().image_size.pixels(), 128);
        assert!(matches!(
            session.active_model().unwrap_err(),
            DomainError::ModelNotLoaded { .. }
        ));
    }

    #[test]
    fn test_failed_load_keeps_prior_handle() {
        let mut session = SessionContext::new(SessionId::generate());
        session.replace_model(FixedClassifier::new(&[4, 4, 1], vec![0.5, 0.5]).handle());
        assert!(session.active_model().is_ok());

        session.mark_load_failed("corrupt file");

        assert!(!session.model_loaded());
        assert!(session.model().is_some());
        assert!(session.active_model().is_err());
        assert_eq!(session.last_error(), Some("corrupt file"));
        assert!(session.snapshot().model.is_none());
    }

    #[test]
    fn test_replace_model_clears_error() {
        let mut session = SessionContext::new(SessionId::generate());
        session.mark_load_failed("bad");
        session.replace_model(FixedClassifier::new(&[4, 4, 1], vec![0.5, 0.5]).handle());

        let snapshot = session.snapshot();
        assert!(snapshot.model_loaded);
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.model.unwrap().file_name, "fixed.h5");
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(&id.to_string()).unwrap(), id);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }
}
