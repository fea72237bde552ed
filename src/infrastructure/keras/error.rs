use thiserror::Error;

use crate::infrastructure::hdf5::Hdf5Error;

/// Errors raised while loading or running a Keras model
#[derive(Debug, Error)]
pub enum KerasError {
    #[error("HDF5: {0}")]
    Hdf5(#[from] Hdf5Error),

    #[error("invalid model config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid model config: {message}")]
    Config { message: String },

    #[error("unsupported layer type '{class_name}' (layer '{layer}')")]
    UnsupportedLayer { class_name: String, layer: String },

    #[error("unsupported model: {message}")]
    Unsupported { message: String },

    #[error("layer '{layer}': {message}")]
    Layer { layer: String, message: String },

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KerasError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn layer(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Layer {
            layer: layer.into(),
            message: message.into(),
        }
    }
}
