use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid ID format: {message}")]
    InvalidId { message: String },

    #[error("Model load error: {message}")]
    ModelLoad { message: String },

    #[error("No model loaded: {message}")]
    ModelNotLoaded { message: String },

    #[error("Inference error: {message}")]
    Inference {
        message: String,
        /// Error chain, outermost first
        details: Vec<String>,
    },

    #[error(
        "Label mismatch: {labels} class labels configured but the model produces {outputs} outputs"
    )]
    LabelMismatch { labels: usize, outputs: usize },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad {
            message: message.into(),
        }
    }

    pub fn model_not_loaded(message: impl Into<String>) -> Self {
        Self::ModelNotLoaded {
            message: message.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Inference {
            details: vec![message.clone()],
            message,
        }
    }

    /// Inference error carrying the full source chain of `error`
    pub fn inference_from(context: &str, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut details = vec![error.to_string()];
        let mut source = error.source();

        while let Some(cause) = source {
            details.push(cause.to_string());
            source = cause.source();
        }

        Self::Inference {
            message: format!("{}: {}", context, error),
            details,
        }
    }

    pub fn label_mismatch(labels: usize, outputs: usize) -> Self {
        Self::LabelMismatch { labels, outputs }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
