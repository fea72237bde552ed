//! Model loading contract

use super::model::ModelHandle;
use crate::domain::DomainError;

/// File extensions accepted for model uploads
pub const MODEL_EXTENSIONS: &[&str] = &["h5", "hdf5"];

/// Turns uploaded model bytes into a [`ModelHandle`].
///
/// Loading is CPU-bound and synchronous; async callers should run it on the
/// blocking pool.
pub trait ModelLoader: Send + Sync + std::fmt::Debug {
    fn load(&self, file_name: &str, bytes: &[u8]) -> Result<ModelHandle, DomainError>;
}

/// Whether a file name carries one of `extensions` (case-insensitive)
pub fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Validate a model upload's file name
pub fn validate_model_file_name(file_name: &str) -> Result<(), DomainError> {
    if has_extension(file_name, MODEL_EXTENSIONS) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "Model file '{}' must have a .h5 or .hdf5 extension",
            file_name
        )))
    }
}
