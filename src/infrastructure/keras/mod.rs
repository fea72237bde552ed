//! Inference-only interpreter for Keras models saved as HDF5

mod config;
mod error;
mod layers;
mod loader;
mod model;
mod weights;

pub use config::{InputMode, LayerSpec, ModelSpec};
pub use error::KerasError;
pub use layers::{build_compatible_flatten, CompatibleFlatten, Flatten, Layer, LayerInput, LayerRegistry};
pub use loader::KerasH5Loader;
pub use model::KerasModel;
pub use weights::{LayerWeights, WeightStore, WeightTensor};
