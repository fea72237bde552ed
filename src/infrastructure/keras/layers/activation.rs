//! Element-wise activation functions

use ndarray::{ArrayD, Axis};

use super::super::error::KerasError;

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    Relu6,
    Sigmoid,
    /// `clip(slope * x + 0.5, 0, 1)`; the slope changed between Keras 2 and 3
    HardSigmoid { slope: f32 },
    Tanh,
    Softmax,
    Softplus,
    Softsign,
    Elu,
    Selu,
    Swish,
    Gelu,
    Exponential,
}

impl Activation {
    pub fn parse(name: &str, keras_major: u8, layer: &str) -> Result<Self, KerasError> {
        Ok(match name {
            "linear" | "identity" => Self::Linear,
            "relu" => Self::Relu,
            "relu6" => Self::Relu6,
            "sigmoid" => Self::Sigmoid,
            "hard_sigmoid" => Self::HardSigmoid {
                slope: if keras_major < 3 { 0.2 } else { 1.0 / 6.0 },
            },
            "tanh" => Self::Tanh,
            "softmax" => Self::Softmax,
            "softplus" => Self::Softplus,
            "softsign" => Self::Softsign,
            "elu" => Self::Elu,
            "selu" => Self::Selu,
            "swish" | "silu" => Self::Swish,
            "gelu" => Self::Gelu,
            "exponential" => Self::Exponential,
            other => {
                return Err(KerasError::layer(
                    layer,
                    format!("unsupported activation '{}'", other),
                ))
            }
        })
    }

    pub fn apply(&self, mut x: ArrayD<f32>) -> ArrayD<f32> {
        match *self {
            Self::Linear => {}
            Self::Softmax => softmax_last_axis(&mut x),
            Self::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Self::Relu6 => x.mapv_inplace(|v| v.clamp(0.0, 6.0)),
            Self::Sigmoid => x.mapv_inplace(sigmoid),
            Self::HardSigmoid { slope } => {
                x.mapv_inplace(|v| (slope * v + 0.5).clamp(0.0, 1.0))
            }
            Self::Tanh => x.mapv_inplace(f32::tanh),
            Self::Softplus => x.mapv_inplace(softplus),
            Self::Softsign => x.mapv_inplace(|v| v / (1.0 + v.abs())),
            Self::Elu => x.mapv_inplace(|v| if v > 0.0 { v } else { v.exp_m1() }),
            Self::Selu => x.mapv_inplace(|v| {
                SELU_SCALE * if v > 0.0 { v } else { SELU_ALPHA * v.exp_m1() }
            }),
            Self::Swish => x.mapv_inplace(|v| v * sigmoid(v)),
            Self::Gelu => {
                x.mapv_inplace(|v| 0.5 * v * (1.0 + erf(v / std::f32::consts::SQRT_2)))
            }
            Self::Exponential => x.mapv_inplace(f32::exp),
        }
        x
    }
}

pub(crate) fn sigmoid(v: f32) -> f32 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

fn softplus(v: f32) -> f32 {
    // log(1 + e^v) without overflow for large v
    v.max(0.0) + (-v.abs()).exp().ln_1p()
}

/// Abramowitz and Stegun 7.1.26, max error 1.5e-7
fn erf(v: f32) -> f32 {
    let x = f64::from(v.abs());
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let y = 1.0 - poly * (-x * x).exp();
    (y as f32).copysign(v)
}

/// Numerically stable softmax over the last axis, in place
pub(crate) fn softmax_last_axis(x: &mut ArrayD<f32>) {
    let Some(last) = x.ndim().checked_sub(1) else {
        return;
    };

    for mut lane in x.lanes_mut(Axis(last)) {
        let max = lane.fold(f32::NEG_INFINITY, |m, v| m.max(*v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        if sum > 0.0 {
            lane.mapv_inplace(|v| v / sum);
        }
    }
}
