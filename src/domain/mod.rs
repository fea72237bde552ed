//! Domain layer - Core business logic and entities

pub mod classifier;
pub mod error;
pub mod labels;
pub mod prediction;
pub mod preprocessing;
pub mod session;

pub use classifier::{Classifier, ModelHandle, ModelInfo, ModelLoader, TensorShape};
pub use error::DomainError;
pub use labels::ClassLabels;
pub use prediction::ClassificationReport;
pub use preprocessing::{ColorMode, ImageSize, PreprocessingConfig};
pub use session::{SessionContext, SessionId, SessionRepository, SessionSnapshot, SharedSession};
