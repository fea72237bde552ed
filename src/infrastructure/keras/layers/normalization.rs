use ndarray::{Array1, ArrayD, Axis};
use serde_json::Value;

use super::{Layer, LayerInput, Shape};
use crate::infrastructure::keras::config::LayerSpec;
use crate::infrastructure::keras::error::KerasError;
use crate::infrastructure::keras::weights::LayerWeights;

/// Inference-mode batch normalization over the last axis, folded into
/// `x * multiplier + offset`
#[derive(Debug)]
pub struct BatchNormalization {
    name: String,
    /// Explicit positive axis from the config; `None` means the last one
    axis: Option<usize>,
    multiplier: Array1<f32>,
    offset: Array1<f32>,
    params: usize,
}

pub fn build_batch_normalization(
    spec: &LayerSpec,
    mut weights: LayerWeights,
) -> Result<Box<dyn Layer>, KerasError> {
    let axis = parse_axis(spec)?;
    let epsilon = spec.f32_or("epsilon", 1e-3)?;
    let gamma = if spec.bool_or("scale", true)? {
        Some(weights.take("gamma")?)
    } else {
        None
    };
    let beta = if spec.bool_or("center", true)? {
        Some(weights.take("beta")?)
    } else {
        None
    };
    let mean = weights.take("moving_mean")?;
    let variance = weights.take("moving_variance")?;
    weights.expect_empty()?;

    let features = mean.len();
    let params = features * 2
        + gamma.as_ref().map_or(0, |g| g.len())
        + beta.as_ref().map_or(0, |b| b.len());

    for tensor in [Some(&variance), gamma.as_ref(), beta.as_ref()].into_iter().flatten() {
        if tensor.len() != features {
            return Err(KerasError::layer(
                &spec.name,
                format!("weight '{}' has {} values, expected {}", tensor.name, tensor.len(), features),
            ));
        }
    }

    let gamma = gamma.map_or_else(|| Array1::ones(features), |g| Array1::from(g.values));
    let beta = beta.map_or_else(|| Array1::zeros(features), |b| Array1::from(b.values));
    let mean = Array1::from(mean.values);
    let variance = Array1::from(variance.values);

    let multiplier = &gamma / &variance.mapv(|v| (v + epsilon).sqrt());
    let offset = &beta - &(&mean * &multiplier);

    Ok(Box::new(BatchNormalization {
        name: spec.name.clone(),
        axis,
        multiplier,
        offset,
        params,
    }))
}

/// `-1`, `[-1]`, `n` or `[n]`; only the last axis is supported
fn parse_axis(spec: &LayerSpec) -> Result<Option<usize>, KerasError> {
    let value = match spec.config.get("axis") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) if items.len() == 1 => &items[0],
        Some(other) => other,
    };

    match value.as_i64() {
        Some(-1) => Ok(None),
        Some(axis) if axis > 0 => Ok(Some(axis as usize)),
        _ => Err(KerasError::layer(
            &spec.name,
            format!("normalization axis {} is not supported", value),
        )),
    }
}

impl BatchNormalization {
    fn check_axis(&self, rank: usize) -> Result<(), KerasError> {
        match self.axis {
            Some(axis) if axis + 1 != rank => Err(KerasError::layer(
                &self.name,
                format!("only the last axis can be normalized, got axis {} of rank {}", axis, rank),
            )),
            _ => Ok(()),
        }
    }
}

impl Layer for BatchNormalization {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "BatchNormalization"
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        self.check_axis(input.len())?;
        match input.last() {
            Some(Some(features)) if *features != self.multiplier.len() => Err(KerasError::layer(
                &self.name,
                format!("input has {} features, expected {}", features, self.multiplier.len()),
            )),
            Some(_) => Ok(input.to_vec()),
            None => Err(KerasError::layer(&self.name, "input has no feature axis")),
        }
    }

    fn param_count(&self) -> usize {
        self.params
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let mut x = input.into_single(&self.name)?;
        self.check_axis(x.ndim())?;
        let last = x
            .ndim()
            .checked_sub(1)
            .ok_or_else(|| KerasError::layer(&self.name, "scalar input"))?;

        if x.shape()[last] != self.multiplier.len() {
            return Err(KerasError::layer(
                &self.name,
                format!("input has {} features, expected {}", x.shape()[last], self.multiplier.len()),
            ));
        }

        for mut lane in x.lanes_mut(Axis(last)) {
            lane.zip_mut_with(&self.multiplier, |v, m| *v *= m);
            lane += &self.offset;
        }
        Ok(x)
    }
}
