//! Classifier domain - loaded models, their shapes and the loading contract

mod loader;
mod model;
mod shape;

pub use loader::{has_extension, validate_model_file_name, ModelLoader, MODEL_EXTENSIONS};
pub use model::{Classifier, LayerSummary, ModelHandle, ModelInfo};
pub use shape::{format_dims, TensorShape};

#[cfg(test)]
pub(crate) use model::testing;
