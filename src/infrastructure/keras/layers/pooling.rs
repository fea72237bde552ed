//! Spatial and global pooling over NHWC tensors

use ndarray::{ArrayD, Axis, Ix4, IxDyn};

use super::conv::{spatial_output, Padding, Window};
use super::{require_rank, Layer, LayerInput, Shape};
use crate::infrastructure::keras::config::LayerSpec;
use crate::infrastructure::keras::error::KerasError;
use crate::infrastructure::keras::weights::LayerWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduce {
    Max,
    Average,
}

impl Reduce {
    fn kind(self, global: bool) -> &'static str {
        match (self, global) {
            (Self::Max, false) => "MaxPooling2D",
            (Self::Average, false) => "AveragePooling2D",
            (Self::Max, true) => "GlobalMaxPooling2D",
            (Self::Average, true) => "GlobalAveragePooling2D",
        }
    }
}

#[derive(Debug)]
pub struct Pooling2D {
    name: String,
    reduce: Reduce,
    rows: Window,
    cols: Window,
}

fn build_pooling(spec: &LayerSpec, weights: LayerWeights, reduce: Reduce) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    spec.require_channels_last()?;

    let (ph, pw) = spec.opt_pair("pool_size")?.unwrap_or((2, 2));
    let (sh, sw) = spec.opt_pair("strides")?.unwrap_or((ph, pw));
    if ph == 0 || pw == 0 || sh == 0 || sw == 0 {
        return Err(KerasError::layer(&spec.name, "pool_size and strides must be positive"));
    }

    let padding = Padding::parse(spec)?;
    let window = |size, stride| Window {
        size,
        stride,
        dilation: 1,
        padding,
    };

    Ok(Box::new(Pooling2D {
        name: spec.name.clone(),
        reduce,
        rows: window(ph, sh),
        cols: window(pw, sw),
    }))
}

pub fn build_max_pooling(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    build_pooling(spec, weights, Reduce::Max)
}

pub fn build_average_pooling(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    build_pooling(spec, weights, Reduce::Average)
}

impl Layer for Pooling2D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.reduce.kind(false)
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        spatial_output(&self.name, input, self.rows, self.cols, None)
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input
            .into_single(&self.name)?
            .into_dimensionality::<Ix4>()
            .map_err(|_| KerasError::layer(&self.name, "expected a 4D NHWC input"))?;

        let (batch, height, width, channels) = x.dim();
        let too_small = || KerasError::layer(&self.name, "input is smaller than the pool");
        let (out_h, pad_top) = self.rows.resolve(height).ok_or_else(too_small)?;
        let (out_w, pad_left) = self.cols.resolve(width).ok_or_else(too_small)?;

        let mut out = ArrayD::zeros(IxDyn(&[batch, out_h, out_w, channels]));

        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for c in 0..channels {
                        // padded cells are skipped, so averages count only real inputs
                        let mut acc = match self.reduce {
                            Reduce::Max => f32::NEG_INFINITY,
                            Reduce::Average => 0.0,
                        };
                        let mut count = 0usize;

                        for ky in 0..self.rows.size {
                            let Some(iy) = self.rows.source(oy, ky, pad_top, height) else {
                                continue;
                            };
                            for kx in 0..self.cols.size {
                                let Some(ix) = self.cols.source(ox, kx, pad_left, width) else {
                                    continue;
                                };
                                let v = x[[b, iy, ix, c]];
                                acc = match self.reduce {
                                    Reduce::Max => acc.max(v),
                                    Reduce::Average => acc + v,
                                };
                                count += 1;
                            }
                        }

                        out[[b, oy, ox, c]] = match self.reduce {
                            Reduce::Max if count == 0 => 0.0,
                            Reduce::Max => acc,
                            Reduce::Average => acc / count.max(1) as f32,
                        };
                    }
                }
            }
        }

        Ok(out)
    }
}

#[derive(Debug)]
pub struct GlobalPooling2D {
    name: String,
    reduce: Reduce,
    keepdims: bool,
}

fn build_global(spec: &LayerSpec, weights: LayerWeights, reduce: Reduce) -> Result<Box<dyn Layer>, KerasError> {
    weights.expect_empty()?;
    spec.require_channels_last()?;

    Ok(Box::new(GlobalPooling2D {
        name: spec.name.clone(),
        reduce,
        keepdims: spec.bool_or("keepdims", false)?,
    }))
}

pub fn build_global_average_pooling(
    spec: &LayerSpec,
    weights: LayerWeights,
) -> Result<Box<dyn Layer>, KerasError> {
    build_global(spec, weights, Reduce::Average)
}

pub fn build_global_max_pooling(spec: &LayerSpec, weights: LayerWeights) -> Result<Box<dyn Layer>, KerasError> {
    build_global(spec, weights, Reduce::Max)
}

impl Layer for GlobalPooling2D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.reduce.kind(true)
    }

    fn output_shape(&self, input: &[Option<usize>]) -> Result<Shape, KerasError> {
        require_rank(&self.name, input, 4)?;

        Ok(if self.keepdims {
            vec![input[0], Some(1), Some(1), input[3]]
        } else {
            vec![input[0], input[3]]
        })
    }

    fn forward(&self, input: LayerInput) -> Result<ArrayD<f32>, KerasError> {
        let x = input
            .into_single(&self.name)?
            .into_dimensionality::<Ix4>()
            .map_err(|_| KerasError::layer(&self.name, "expected a 4D NHWC input"))?;

        let (batch, height, width, channels) = x.dim();
        if height == 0 || width == 0 {
            return Err(KerasError::layer(&self.name, "input has no spatial extent"));
        }

        let pooled = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch, height * width, channels))?;

        let reduced = match self.reduce {
            Reduce::Average => pooled
                .mean_axis(Axis(1))
                .ok_or_else(|| KerasError::layer(&self.name, "input has no spatial extent"))?,
            Reduce::Max => pooled.fold_axis(Axis(1), f32::NEG_INFINITY, |m, v| m.max(*v)),
        };

        let shape = if self.keepdims {
            vec![batch, 1, 1, channels]
        } else {
            vec![batch, channels]
        };
        Ok(reduced.into_shape_with_order(IxDyn(&shape))?)
    }
}
