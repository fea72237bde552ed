//! Core layers: dense, reshaping, activations and pass-through layers

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};

use super::activation::{softmax_last_axis, Activation};
use super::{known_size, Layer, LayerInput, Shape};
use crate::infrastructure::keras::config::LayerSpec;
use crate::infrastructure::keras::error::KerasError;
use crate::infrastructure::keras::weights::LayerWeights;

/// Fully connected layer applied to the last axis
#[derive(Debug)]
pub struct Dense {
    name: String,
    kernel: Array2<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
}

impl Dense {
    pub fn new(
        name: impl Into<String>,
        kernel: Array2<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    ) -> Self {
        Self {
            name: name.into(),
            kernel,
            bias,
            activation,
        }
    }

    fn units(&self) -> usize {
        self.kernel.ncols()
    }
}

pub fn build_dense(spec: &LayerSpec, mut weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    let units = spec.usize("units")?;
    let activation = Activation::parse(&spec.activation("activation")?, spec.keras_major, &spec.name)?;

    let kernel = weights
        .take("kernel")?
        .into_array()?
        .into_dimensionality::<Ix2>()
        .map_err(|_| KerasError::layer(&spec.name, "kernel must be 2-dimensional"))?;

    if kernel.ncols() != units {
        return Err(KerasError::layer(
            &spec.name,
            format!("kernel has {} columns but units is {}", kernel.ncols(), units),
        ));
    }

    let bias = if spec.bool_or("use_bias", true)? {
        let bias = weights
            .take("bias")?
            .into_array()?
            .into_dimensionality::<Ix1>()
            .map_err(|_| KerasError::layer(&spec.name, "bias must be 1-dimensional"))?;

        if bias.len() != units {
            return Err(KerasError::layer(
                &spec.name,
                format!("bias has {} values but units is {}", bias.len(), units),
            ));
        }
        Some(bias)
    } else {
        None
    };

    weights.expect_empty()?;
    Ok(Box::new(Dense::new(&spec.name, kernel, bias, activation)))
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "Dense"
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        let Some((last, _)) = input.split_last().filter(|_| input.len() >= 2) else {
            return Err(KerasError::layer(&self.name, "input must have a feature axis"));
        };

        if let Some(features) = last {
            if *features != self.kernel.nrows() {
                return Err(KerasError::layer(
                    &self.name,
                    format!(
                        "input has {} features but the kernel expects {}",
                        features,
                        self.kernel.nrows()
                    ),
                ));
            }
        }

        let mut output = input.to_vec();
        if let Some(last) = output.last_mut() {
            *last = Some(self.units());
        }
        Ok(output)
    }

    fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.as_ref().map_or(0, |b| b.len())
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input.into_single(&self.name)?;
        let mut shape = x.shape().to_vec();
        let features = shape.last().copied().unwrap_or(0);

        if features != self.kernel.nrows() || shape.len() < 2 {
            return Err(KerasError::layer(
                &self.name,
                format!(
                    "got input with shape {:?}, expected last axis {}",
                    shape,
                    self.kernel.nrows()
                ),
            ));
        }

        let rows = x.len() / features.max(1);
        let x = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, features))?;

        let mut y = x.dot(&self.kernel);
        if let Some(bias) = &self.bias {
            y += bias;
        }

        if let Some(last) = shape.last_mut() {
            *last = self.units();
        }
        let y = y.into_shape_with_order(IxDyn(&shape))?;
        Ok(self.activation.apply(y))
    }
}

/// Collapses every non-batch axis into one
#[derive(Debug)]
pub struct Flatten {
    name: String,
}

impl Flatten {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub fn build_flatten(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    spec.require_channels_last()?;
    Ok(Box::new(Flatten::new(&spec.name)))
}

impl Layer for Flatten {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "Flatten"
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        let Some((batch, rest)) = input.split_first() else {
            return Err(KerasError::layer(&self.name, "input has no batch axis"));
        };
        Ok(vec![*batch, known_size(rest)])
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input.into_single(&self.name)?;
        let batch = x.shape().first().copied().unwrap_or(1);
        let features = if batch == 0 { 0 } else { x.len() / batch };

        Ok(x.as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&[batch, features]))?)
    }
}

/// `Flatten` that also accepts a one-element list of tensors.
///
/// Some saved graphs call Flatten with `[tensor]`; the list is unwrapped and
/// the call delegated unchanged.
#[derive(Debug)]
pub struct CompatibleFlatten {
    inner: Flatten,
}

impl CompatibleFlatten {
    pub fn new(inner: Flatten) -> Self {
        Self { inner }
    }
}

impl Layer for CompatibleFlatten {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        self.inner.output_shape(input)
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        match input {
            LayerInput::Collection(mut tensors) if tensors.len() == 1 => {
                self.inner.forward(LayerInput::Single(tensors.remove(0)))
            }
            other => self.inner.forward(other),
        }
    }
}

/// Reshape of the non-batch axes; one target dim may be `-1`
#[derive(Debug)]
pub struct Reshape {
    name: String,
    target: Vec<Option<usize>>,
}

pub fn build_reshape(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;

    let target = spec
        .config
        .get("target_shape")
        .and_then(|v| v.as_array())
        .ok_or_else(|| KerasError::layer(&spec.name, "target_shape must be a list"))?
        .iter()
        .map(|d| match d.as_i64() {
            Some(-1) => Ok(None),
            Some(d) if d > 0 => Ok(Some(d as usize)),
            _ => Err(KerasError::layer(&spec.name, format!("invalid target dim {}", d))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if target.iter().filter(|d| d.is_none()).count() > 1 {
        return Err(KerasError::layer(&spec.name, "only one target dim may be -1"));
    }

    Ok(Box::new(Reshape {
        name: spec.name.clone(),
        target,
    }))
}

impl Reshape {
    fn resolve(&self, elements: usize) -> Result<Vec<usize>, KerasError> {
        let known: usize = self.target.iter().flatten().product();
        let mut dims = Vec::with_capacity(self.target.len());

        for dim in &self.target {
            match dim {
                Some(d) => dims.push(*d),
                None if known > 0 && elements % known == 0 => dims.push(elements / known),
                None => {
                    return Err(KerasError::layer(
                        &self.name,
                        format!("cannot infer -1 dim for {} elements", elements),
                    ))
                }
            }
        }

        if dims.iter().product::<usize>() != elements {
            return Err(KerasError::layer(
                &self.name,
                format!("cannot reshape {} elements into {:?}", elements, dims),
            ));
        }

        Ok(dims)
    }
}

impl Layer for Reshape {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "Reshape"
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        let Some((batch, rest)) = input.split_first() else {
            return Err(KerasError::layer(&self.name, "input has no batch axis"));
        };

        let mut output = vec![*batch];
        match known_size(rest) {
            Some(elements) => output.extend(self.resolve(elements)?.into_iter().map(Some)),
            None => output.extend(self.target.iter().copied()),
        }
        Ok(output)
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input.into_single(&self.name)?;
        let batch = x.shape().first().copied().unwrap_or(1);
        let per_item = if batch == 0 { 0 } else { x.len() / batch };

        let mut shape = vec![batch];
        shape.extend(self.resolve(per_item)?);
        Ok(x.as_standard_layout().into_owned().into_shape_with_order(IxDyn(&shape))?)
    }
}

/// Shape-preserving element-wise layer
#[derive(Debug)]
pub struct Elementwise {
    name: String,
    kind: &'static str,
    op: ElementwiseOp,
}

#[derive(Debug, Clone, Copy)]
enum ElementwiseOp {
    Identity,
    Activation(Activation),
    Relu {
        max_value: Option<f32>,
        negative_slope: f32,
        threshold: f32,
    },
    Softmax,
    Affine {
        scale: f32,
        offset: f32,
    },
}

impl Elementwise {
    fn boxed(spec: &LayerSpec, kind: &'static str, op: ElementwiseOp) -> Box<dyn Layer> {
        Box::new(Self {
            name: spec.name.clone(),
            kind,
            op,
        })
    }
}

impl Layer for Elementwise {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        Ok(input.to_vec())
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let mut x = input.into_single(&self.name)?;

        match self.op {
            ElementwiseOp::Identity => {}
            ElementwiseOp::Activation(activation) => x = activation.apply(x),
            ElementwiseOp::Relu {
                max_value,
                negative_slope,
                threshold,
            } => x.mapv_inplace(|v| {
                let y = if v >= threshold {
                    v
                } else {
                    negative_slope * (v - threshold)
                };
                max_value.map_or(y, |m| y.min(m))
            }),
            ElementwiseOp::Softmax => softmax_last_axis(&mut x),
            ElementwiseOp::Affine { scale, offset } => x.mapv_inplace(|v| v * scale + offset),
        }

        Ok(x)
    }
}

pub fn build_identity(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    Ok(Elementwise::boxed(spec, kind_name(spec), ElementwiseOp::Identity))
}

pub fn build_activation(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    let activation = Activation::parse(&spec.activation("activation")?, spec.keras_major, &spec.name)?;
    Ok(Elementwise::boxed(spec, "Activation", ElementwiseOp::Activation(activation)))
}

pub fn build_relu(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    let op = ElementwiseOp::Relu {
        max_value: spec.opt_f32("max_value")?,
        negative_slope: spec.f32_or("negative_slope", 0.0)?,
        threshold: spec.f32_or("threshold", 0.0)?,
    };
    Ok(Elementwise::boxed(spec, "ReLU", op))
}

pub fn build_leaky_relu(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    // Keras 2 calls the slope `alpha`, Keras 3 `negative_slope`
    let slope = match spec.opt_f32("negative_slope")? {
        Some(slope) => slope,
        None => spec.f32_or("alpha", 0.3)?,
    };
    let op = ElementwiseOp::Relu {
        max_value: None,
        negative_slope: slope,
        threshold: 0.0,
    };
    Ok(Elementwise::boxed(spec, "LeakyReLU", op))
}

pub fn build_softmax(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    match spec.config.get("axis").and_then(|a| a.as_i64()) {
        None | Some(-1) => Ok(Elementwise::boxed(spec, "Softmax", ElementwiseOp::Softmax)),
        Some(axis) => Err(KerasError::layer(
            &spec.name,
            format!("softmax over axis {} is not supported", axis),
        )),
    }
}

pub fn build_rescaling(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    let op = ElementwiseOp::Affine {
        scale: spec.f32_or("scale", 1.0)?,
        offset: spec.f32_or("offset", 0.0)?,
    };
    Ok(Elementwise::boxed(spec, "Rescaling", op))
}

fn kind_name(spec: &LayerSpec) -> &'static str {
    match spec.class_name.as_str() {
        "Dropout" => "Dropout",
        "SpatialDropout1D" => "SpatialDropout1D",
        "SpatialDropout2D" => "SpatialDropout2D",
        "SpatialDropout3D" => "SpatialDropout3D",
        "GaussianNoise" => "GaussianNoise",
        "GaussianDropout" => "GaussianDropout",
        "AlphaDropout" => "AlphaDropout",
        "ActivityRegularization" => "ActivityRegularization",
        _ => "Identity",
    }
}
