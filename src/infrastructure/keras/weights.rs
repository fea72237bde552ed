//! Reading per-layer weight tensors from the `model_weights` group

use ndarray::{ArrayD, IxDyn};

use super::error::KerasError;
use crate::infrastructure::hdf5::Group;

/// One stored variable, e.g. a Dense kernel
#[derive(Debug, Clone)]
pub struct WeightTensor {
    /// Variable name without scope or `:0` suffix (`kernel`, `moving_mean`, ...)
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl WeightTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_array(self) -> Result<ArrayD<f32>, KerasError> {
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), self.values)?)
    }
}

/// The weights stored for one layer, consumed by its builder
#[derive(Debug, Clone)]
pub struct LayerWeights {
    layer: String,
    tensors: Vec<WeightTensor>,
}

impl LayerWeights {
    pub fn new(layer: impl Into<String>, tensors: Vec<WeightTensor>) -> Self {
        Self {
            layer: layer.into(),
            tensors,
        }
    }

    pub fn empty(layer: impl Into<String>) -> Self {
        Self::new(layer, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Remove the tensor called `name`
    pub fn take(&mut self, name: &str) -> Result<WeightTensor, KerasError> {
        self.take_optional(name).ok_or_else(|| {
            let available: Vec<&str> = self.tensors.iter().map(|t| t.name.as_str()).collect();
            KerasError::layer(
                &self.layer,
                format!("missing weight '{}' (found: [{}])", name, available.join(", ")),
            )
        })
    }

    pub fn take_optional(&mut self, name: &str) -> Option<WeightTensor> {
        let index = self.tensors.iter().position(|t| t.name == name)?;
        Some(self.tensors.remove(index))
    }

    /// Fail if weights are left over after a builder took what it needs
    pub fn expect_empty(&self) -> Result<(), KerasError> {
        if self.tensors.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = self.tensors.iter().map(|t| t.name.as_str()).collect();
        Err(KerasError::layer(
            &self.layer,
            format!("unexpected weights [{}]", names.join(", ")),
        ))
    }
}

/// Weight groups keyed by layer name
#[derive(Debug, Clone)]
pub struct WeightStore<'f> {
    group: Group<'f>,
    layer_names: Vec<String>,
}

impl<'f> WeightStore<'f> {
    pub fn new(group: Group<'f>) -> Result<Self, KerasError> {
        let layer_names = match group.attribute("layer_names")? {
            Some(attribute) => attribute.read_strings()?,
            None => group.member_names()?,
        };

        Ok(Self { group, layer_names })
    }

    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }

    /// All tensors listed in the layer's `weight_names`, in stored order
    pub fn layer(&self, name: &str) -> Result<LayerWeights, KerasError> {
        if !self.layer_names.iter().any(|n| n == name) {
            return Ok(LayerWeights::empty(name));
        }

        let group = self.group.group(name)?;
        let weight_names = match group.attribute("weight_names")? {
            Some(attribute) => attribute.read_strings()?,
            None => Vec::new(),
        };

        let tensors = weight_names
            .iter()
            .map(|path| {
                let dataset = group.dataset(path)?;
                Ok(WeightTensor::new(
                    short_name(path),
                    dataset.shape(),
                    dataset.read_f32()?,
                ))
            })
            .collect::<Result<Vec<_>, KerasError>>()?;

        Ok(LayerWeights::new(name, tensors))
    }
}

/// `dense_1/kernel:0` and `sequential/dense_1/kernel` both become `kernel`
pub fn short_name(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once(':') {
        Some((name, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => last.to_string(),
    }
}
