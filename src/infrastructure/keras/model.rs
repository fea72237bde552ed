//! A layer chain assembled from a Keras model config and its weights

use ndarray::{Array2, Array4, ArrayD, Ix2};
use tracing::debug;

use super::config::{InputMode, ModelSpec};
use super::error::KerasError;
use super::layers::{Layer, LayerInput, LayerRegistry, Shape};
use super::weights::WeightStore;
use crate::domain::classifier::{format_dims, Classifier, LayerSummary, TensorShape};
use crate::domain::DomainError;

#[derive(Debug)]
struct Node {
    layer: Box<dyn Layer>,
    input_mode: InputMode,
    output_shape: TensorShape,
}

/// Sequential inference over a chain of built layers
#[derive(Debug)]
pub struct KerasModel {
    name: String,
    input_shape: TensorShape,
    output_shape: TensorShape,
    nodes: Vec<Node>,
}

impl KerasModel {
    pub fn build(
        spec: &ModelSpec,
        weights: &WeightStore<'_>,
        registry: &LayerRegistry,
    ) -> Result<Self, KerasError> {
        let input_shape = spec
            .input_shape
            .clone()
            .ok_or_else(|| KerasError::config("model does not declare an input shape"))?;

        let layers = spec
            .layers
            .iter()
            .map(|layer_spec| {
                let layer = registry.build(layer_spec, weights.layer(&layer_spec.name)?)?;
                Ok((layer, layer_spec.input_mode))
            })
            .collect::<Result<Vec<_>, KerasError>>()?;

        Self::from_layers(&spec.name, input_shape, layers)
    }

    /// Chain already-built layers, propagating shapes from `input_shape`
    pub fn from_layers(
        name: &str,
        input_shape: Shape,
        layers: Vec<(Box<dyn Layer>, InputMode)>,
    ) -> Result<Self, KerasError> {
        if layers.is_empty() {
            return Err(KerasError::config("model has no layers"));
        }

        let mut shape = input_shape.clone();
        let mut nodes = Vec::with_capacity(layers.len());

        for (layer, input_mode) in layers {
            shape = layer.output_shape(&shape)?;
            debug!(
                layer = layer.name(),
                kind = layer.kind(),
                output_shape = %TensorShape::new(shape.clone()),
                "Built layer"
            );

            nodes.push(Node {
                layer,
                input_mode,
                output_shape: TensorShape::new(shape.clone()),
            });
        }

        Ok(Self {
            name: name.to_string(),
            input_shape: TensorShape::new(input_shape),
            output_shape: TensorShape::new(shape),
            nodes,
        })
    }

    fn run(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, KerasError> {
        self.nodes.iter().try_fold(input, |x, node| {
            let input = match node.input_mode {
                InputMode::Single => LayerInput::Single(x),
                InputMode::Collection => LayerInput::Collection(vec![x]),
            };
            node.layer.forward(input)
        })
    }
}

impl Classifier for KerasModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_shape(&self) -> &TensorShape {
        &self.input_shape
    }

    fn output_shape(&self) -> &TensorShape {
        &self.output_shape
    }

    fn param_count(&self) -> usize {
        self.nodes.iter().map(|n| n.layer.param_count()).sum()
    }

    fn summary(&self) -> Vec<LayerSummary> {
        self.nodes
            .iter()
            .map(|node| LayerSummary {
                name: node.layer.name().to_string(),
                kind: node.layer.kind().to_string(),
                output_shape: node.output_shape.clone(),
                param_count: node.layer.param_count(),
            })
            .collect()
    }

    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, DomainError> {
        let output = self
            .run(input.clone().into_dyn())
            .map_err(|e| DomainError::inference_from("Prediction failed", &e))?;

        let shape = output.shape().to_vec();
        output.into_dimensionality::<Ix2>().map_err(|_| {
            DomainError::inference(format!(
                "Model output has shape {}, expected (batch, classes)",
                format_dims(&shape)
            ))
        })
    }
}
