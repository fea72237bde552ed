//! 2D convolution over NHWC tensors

use ndarray::{Array1, ArrayD, Ix4, IxDyn};

use super::activation::Activation;
use super::{require_rank, Layer, LayerInput, Shape};
use crate::infrastructure::keras::config::LayerSpec;
use crate::infrastructure::keras::error::KerasError;
use crate::infrastructure::keras::weights::LayerWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Padding {
    Valid,
    Same,
}

impl Padding {
    pub(super) fn parse(spec: &LayerSpec) -> Result<Self, KerasError> {
        match spec.str_or("padding", "valid")? {
            "valid" => Ok(Self::Valid),
            "same" => Ok(Self::Same),
            other => Err(KerasError::layer(
                &spec.name,
                format!("padding '{}' is not supported", other),
            )),
        }
    }
}

/// Sliding window along one spatial axis
#[derive(Debug, Clone, Copy)]
pub(super) struct Window {
    pub size: usize,
    pub stride: usize,
    pub dilation: usize,
    pub padding: Padding,
}

impl Window {
    fn effective_size(&self) -> usize {
        (self.size - 1) * self.dilation + 1
    }

    /// Output length and leading pad for an input of length `input`
    pub(super) fn resolve(&self, input: usize) -> Option<(usize, usize)> {
        let effective = self.effective_size();
        match self.padding {
            Padding::Valid if input >= effective => Some(((input - effective) / self.stride + 1, 0)),
            Padding::Valid => None,
            Padding::Same => {
                let output = input.div_ceil(self.stride);
                let needed = ((output.saturating_sub(1)) * self.stride + effective).saturating_sub(input);
                Some((output, needed / 2))
            }
        }
    }

    /// Input index for output position `out` and tap `tap`, if inside the input
    #[inline]
    pub(super) fn source(&self, out: usize, tap: usize, pad: usize, input: usize) -> Option<usize> {
        let index = (out * self.stride + tap * self.dilation).checked_sub(pad)?;
        (index < input).then_some(index)
    }
}

pub(super) fn spatial_output(
    layer: &str,
    input: &[Option<usize>],
    rows: Window,
    cols: Window,
    channels: Option<usize>,
) -> Result<Shape, KerasError> {
    require_rank(layer, input, 4)?;

    let resolve = |dim: Option<usize>, window: Window| match dim {
        None => Ok(None),
        Some(d) => window.resolve(d).map(|(out, _)| Some(out)).ok_or_else(|| {
            KerasError::layer(
                layer,
                format!("input size {} is smaller than the window {}", d, window.effective_size()),
            )
        }),
    };

    Ok(vec![
        input[0],
        resolve(input[1], rows)?,
        resolve(input[2], cols)?,
        channels.or(input[3]),
    ])
}

#[derive(Debug)]
pub struct Conv2D {
    name: String,
    /// `(kh, kw, in_channels, filters)`, row-major
    kernel: ndarray::Array4<f32>,
    bias: Option<Array1<f32>>,
    rows: Window,
    cols: Window,
    activation: Activation,
}

pub fn build_conv2d(spec: &LayerSpec, mut weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    spec.require_channels_last()?;

    let filters = spec.usize("filters")?;
    if spec.config.get("groups").and_then(|g| g.as_u64()).unwrap_or(1) != 1 {
        return Err(KerasError::layer(&spec.name, "grouped convolution is not supported"));
    }

    let (kh, kw) = spec.pair("kernel_size")?;
    let (sh, sw) = spec.opt_pair("strides")?.unwrap_or((1, 1));
    let (dh, dw) = spec.opt_pair("dilation_rate")?.unwrap_or((1, 1));
    if sh == 0 || sw == 0 || dh == 0 || dw == 0 || kh == 0 || kw == 0 {
        return Err(KerasError::layer(&spec.name, "kernel, strides and dilation must be positive"));
    }
    if (sh > 1 || sw > 1) && (dh > 1 || dw > 1) {
        return Err(KerasError::layer(&spec.name, "strides > 1 cannot be combined with dilation"));
    }

    let padding = Padding::parse(spec)?;
    let activation = Activation::parse(&spec.activation("activation")?, spec.keras_major, &spec.name)?;

    let kernel = weights
        .take("kernel")?
        .into_array()?
        .into_dimensionality::<Ix4>()
        .map_err(|_| KerasError::layer(&spec.name, "kernel must be 4-dimensional"))?;

    let shape = kernel.shape();
    if shape[0] != kh || shape[1] != kw || shape[3] != filters {
        return Err(KerasError::layer(
            &spec.name,
            format!(
                "kernel shape {:?} does not match kernel_size ({}, {}) and {} filters",
                shape, kh, kw, filters
            ),
        ));
    }

    let bias = if spec.bool_or("use_bias", true)? {
        let bias = weights.take("bias")?;
        if bias.len() != filters {
            return Err(KerasError::layer(
                &spec.name,
                format!("bias has {} values but filters is {}", bias.len(), filters),
            ));
        }
        Some(Array1::from(bias.values))
    } else {
        None
    };

    weights.expect_empty()?;

    Ok(Box::new(Conv2D {
        name: spec.name.clone(),
        kernel: kernel.as_standard_layout().into_owned(),
        bias,
        rows: Window {
            size: kh,
            stride: sh,
            dilation: dh,
            padding,
        },
        cols: Window {
            size: kw,
            stride: sw,
            dilation: dw,
            padding,
        },
        activation,
    }))
}

impl Conv2D {
    fn in_channels(&self) -> usize {
        self.kernel.shape()[2]
    }

    fn filters(&self) -> usize {
        self.kernel.shape()[3]
    }
}

impl Layer for Conv2D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "Conv2D"
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        if let Some(Some(channels)) = input.get(3) {
            if *channels != self.in_channels() {
                return Err(KerasError::layer(
                    &self.name,
                    format!(
                        "input has {} channels but the kernel expects {}",
                        channels,
                        self.in_channels()
                    ),
                ));
            }
        }
        spatial_output(&self.name, input, self.rows, self.cols, Some(self.filters()))
    }

    fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.as_ref().map_or(0, |b| b.len())
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input
            .into_single(&self.name)?
            .into_dimensionality::<Ix4>()
            .map_err(|_| KerasError::layer(&self.name, "expected a 4D NHWC input"))?;
        let x = x.as_standard_layout();

        let (batch, height, width, channels) = x.dim();
        if channels != self.in_channels() {
            return Err(KerasError::layer(
                &self.name,
                format!("input has {} channels, expected {}", channels, self.in_channels()),
            ));
        }

        let too_small = || KerasError::layer(&self.name, "input is smaller than the kernel");
        let (out_h, pad_top) = self.rows.resolve(height).ok_or_else(too_small)?;
        let (out_w, pad_left) = self.cols.resolve(width).ok_or_else(too_small)?;

        let filters = self.filters();
        let (kh, kw) = (self.rows.size, self.cols.size);

        let src = x.as_slice().ok_or_else(|| KerasError::layer(&self.name, "non-contiguous input"))?;
        let kernel = self
            .kernel
            .as_slice()
            .ok_or_else(|| KerasError::layer(&self.name, "non-contiguous kernel"))?;

        let mut out = vec![0f32; batch * out_h * out_w * filters];

        for (b, out_image) in out.chunks_exact_mut(out_h * out_w * filters).enumerate() {
            let image = &src[b * height * width * channels..(b + 1) * height * width * channels];

            for oy in 0..out_h {
                for ox in 0..out_w {
                    let acc = &mut out_image[(oy * out_w + ox) * filters..][..filters];
                    if let Some(bias) = &self.bias {
                        acc.iter_mut().zip(bias.iter()).for_each(|(a, b)| *a = *b);
                    }

                    for ky in 0..kh {
                        let Some(iy) = self.rows.source(oy, ky, pad_top, height) else {
                            continue;
                        };
                        for kx in 0..kw {
                            let Some(ix) = self.cols.source(ox, kx, pad_left, width) else {
                                continue;
                            };

                            let pixel = &image[(iy * width + ix) * channels..][..channels];
                            let taps = &kernel[(ky * kw + kx) * channels * filters..][..channels * filters];

                            for (c, value) in pixel.iter().enumerate() {
                                let row = &taps[c * filters..][..filters];
                                for (a, w) in acc.iter_mut().zip(row) {
                                    *a += value * w;
                                }
                            }
                        }
                    }
                }
            }
        }

        let y = ArrayD::from_shape_vec(IxDyn(&[batch, out_h, out_w, filters]), out)?;
        Ok(self.activation.apply(y))
    }
}
