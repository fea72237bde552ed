//! Inference-only implementations of the supported Keras layers

mod activation;
mod conv;
mod common;
mod normalization;
mod pooling;

use std::collections::HashMap;
use std::fmt;

use ndarray::ArrayD;

use super::config::LayerSpec;
use super::error::KerasError;
use super::weights::LayerWeights;

pub use activation::Activation;
pub use common::{CompatibleFlatten, Flatten};

/// Shape with the batch axis first; `None` is unknown
pub type Shape = Vec<Option<usize>>;

/// What a layer is called with
#[derive(Debug, Clone)]
pub enum LayerInput {
    Single(ArrayD<f32>),
    Collection(Vec<ArrayD<f32>>),
}

impl LayerInput {
    /// The tensor of a single-input call; collections are rejected
    pub fn into_single(self, layer: &str) -> Result<ArrayD<f32>, KerasError> {
        match self {
            Self::Single(tensor) => Ok(tensor),
            Self::Collection(tensors) => Err(KerasError::layer(
                layer,
                format!(
                    "expected a single tensor, got a list of {} tensors",
                    tensors.len()
                ),
            )),
        }
    }
}

/// A layer's forward computation in inference mode
pub trait Layer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Class name shown in summaries
    fn kind(&self) -> &str;

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError>;

    fn param_count(&self) -> usize {
        0
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError>;
}

/// Constructs a layer from its config entry and stored weights
pub type LayerBuilder = fn(&LayerSpec, LayerWeights) -> Result<Box<dyn Layer>, KerasError>;

/// Maps Keras class names to layer builders
#[derive(Clone)]
pub struct LayerRegistry {
    builders: HashMap<String, LayerBuilder>,
}

impl LayerRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Every built-in layer type
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.register("Dense", common::build_dense);
        registry.register("Flatten", common::build_flatten);
        registry.register("Reshape", common::build_reshape);
        registry.register("Activation", common::build_activation);
        registry.register("ReLU", common::build_relu);
        registry.register("LeakyReLU", common::build_leaky_relu);
        registry.register("Softmax", common::build_softmax);
        registry.register("Rescaling", common::build_rescaling);

        for passthrough in [
            "Dropout",
            "SpatialDropout1D",
            "SpatialDropout2D",
            "SpatialDropout3D",
            "GaussianNoise",
            "GaussianDropout",
            "AlphaDropout",
            "ActivityRegularization",
        ] {
            registry.register(passthrough, common::build_identity);
        }

        registry.register("Conv2D", conv::build_conv2d);
        registry.register("Convolution2D", conv::build_conv2d);
        registry.register("MaxPooling2D", pooling::build_max_pooling);
        registry.register("MaxPool2D", pooling::build_max_pooling);
        registry.register("AveragePooling2D", pooling::build_average_pooling);
        registry.register("AvgPool2D", pooling::build_average_pooling);
        registry.register("GlobalAveragePooling2D", pooling::build_global_average_pooling);
        registry.register("GlobalAvgPool2D", pooling::build_global_average_pooling);
        registry.register("GlobalMaxPooling2D", pooling::build_global_max_pooling);
        registry.register("GlobalMaxPool2D", pooling::build_global_max_pooling);
        registry.register("BatchNormalization", normalization::build_batch_normalization);

        registry
    }

    /// Register (or replace) the builder for a class name
    pub fn register(&mut self, class_name: &str, builder: LayerBuilder) -> &mut Self {
        self.builders.insert(class_name.to_string(), builder);
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.builders.contains_key(class_name)
    }

    pub fn build(&self, spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
        let builder = self
            .builders
            .get(&spec.class_name)
            .ok_or_else(|| KerasError::UnsupportedLayer {
                class_name: spec.class_name.clone(),
                layer: spec.name.clone(),
            })?;

        builder(spec, weights)
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("LayerRegistry").field("layers", &names).finish()
    }
}

/// Layer builder that resolves `Flatten` to [`CompatibleFlatten`]
pub fn build_compatible_flatten(
    spec: &LayerSpec,
    weights: LayerWeights,
) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    spec.require_channels_last()?;
    Ok(Box::new(CompatibleFlatten::new(Flatten::new(&spec.name))))
}

/// Number of elements of a shape when every non-batch dim is known
pub(crate) fn known_size(dims: &[Option<usize>]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, d| d.map(|d| acc * d))
}

/// Non-batch dims that must be known, e.g. for spatial layers
pub(crate) fn require_rank(
    layer: &str,
    input: &[Option<usize>],
    rank: usize,
) -> Result<(), KerasError> {
    if input.len() != rank {
        return Err(KerasError::layer(
            layer,
            format!(
                "expected a rank {} input (including batch), got rank {}",
                rank,
                input.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::keras::config::InputMode;
    use serde_json::json;

    fn spec(class_name: &str) -> LayerSpec {
        LayerSpec {
            class_name: class_name.into(),
            name: "layer".into(),
            config: json!({"name": "layer"}),
            input_mode: InputMode::Single,
            keras_major: 2,
        }
    }

    #[test]
    fn test_unknown_layer() {
        let err = LayerRegistry::standard()
            .build(&spec("Attention"), LayerWeights::empty("layer"))
            .unwrap_err();

        assert!(matches!(err, KerasError::UnsupportedLayer { class_name, .. } if class_name == "Attention"));
    }

    #[test]
    fn test_register_overrides_builder() {
        let mut registry = LayerRegistry::standard();
        registry.register("Flatten", build_compatible_flatten);

        let layer = registry
            .build(&spec("Flatten"), LayerWeights::empty("layer"))
            .unwrap();
        let input = ArrayD::zeros(vec![1, 2, 3]);

        let output = layer
            .forward(LayerInput::Collection(vec![input.clone()]))
            .unwrap();
        assert_eq!(output.shape(), &[1, 6]);
    }

    #[test]
    fn test_into_single_rejects_collection() {
        let input = LayerInput::Collection(vec![ArrayD::zeros(vec![1, 2])]);
        assert!(input.into_single("flatten").is_err());
    }

    #[test]
    fn test_known_size() {
        assert_eq!(known_size(&[Some(2), Some(3)]), Some(6));
        assert_eq!(known_size(&[Some(2), None]), None);
    }
}
