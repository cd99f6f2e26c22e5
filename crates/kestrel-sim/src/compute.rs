//! Full-precision compute kernels.
//!
//! These run in the wide accumulator domain: no rounding, no saturation.
//! Quantization and activation are applied afterwards by the layer drivers in
//! `simulate`. Transposed convolution is computed the way the hardware views
//! it: the input is zero-stuffed by the fractional stride and correlated with
//! effective padding `dilation*(kernel-1) - padding`; the kernel is not
//! flipped and channels are not swapped (the checkpoint loader already
//! arranges the weights for this orientation).

use crate::tensor::{Shape, Tensor};
use crate::weights::{ConvWeights, LinearWeights};
use crate::EltwiseOp;

/// Floor division (toward negative infinity).
fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Parameters shared by the 1-D and 2-D convolution kernels.
#[derive(Debug, Clone, Copy)]
pub struct ConvGeometry {
    /// Convolution stride per axis (always `(1, 1)` when fractionally strided).
    pub stride: (usize, usize),
    /// Zero padding per axis.
    pub pad: (usize, usize),
    /// Kernel dilation per axis.
    pub dilation: (usize, usize),
    /// Fractional (input zero-stuffing) stride; `(1, 1)` for plain convolution.
    pub fractional_stride: (usize, usize),
    /// Convolution group count.
    pub groups: usize,
}

/// Input sample on the (possibly zero-stuffed) grid, or 0 outside it.
fn sample(data: &Tensor, c: usize, pos: (i64, i64), fs: (usize, usize)) -> i64 {
    let (r, col) = pos;
    if r < 0 || col < 0 {
        return 0;
    }
    let (fr, fc) = (fs.0 as i64, fs.1 as i64);
    if r % fr != 0 || col % fc != 0 {
        return 0; // zero-stuffed position
    }
    let (r, col) = ((r / fr) as usize, (col / fc) as usize);
    let shape = data.shape();
    if r >= shape.rows || col >= shape.cols {
        return 0;
    }
    data.get(c, r, col)
}

/// 2-D convolution (or fractionally strided convolution) at full precision.
/// `bias` values are already pre-scaled by the device bias divisor.
#[must_use]
pub fn conv2d(
    data: &Tensor,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
    out_shape: Shape,
    geo: &ConvGeometry,
) -> Tensor {
    let (kh, kw) = weights.kernel();
    let fractional = geo.fractional_stride.0 > 1 || geo.fractional_stride.1 > 1;
    // Effective padding on the zero-stuffed grid.
    let (ph, pw) = if fractional {
        (
            geo.dilation.0 as i64 * (kh as i64 - 1) - geo.pad.0 as i64,
            geo.dilation.1 as i64 * (kw as i64 - 1) - geo.pad.1 as i64,
        )
    } else {
        (geo.pad.0 as i64, geo.pad.1 as i64)
    };

    let out_per_group = out_shape.channels / geo.groups;
    let mut out = Tensor::zeros(out_shape);
    for k in 0..out_shape.channels {
        let group = k / out_per_group;
        for oh in 0..out_shape.rows {
            for ow in 0..out_shape.cols {
                let mut acc = bias.map_or(0, |b| b[k]);
                for i in 0..weights.in_per_group() {
                    let c = group * weights.in_per_group() + i;
                    for y in 0..kh {
                        for x in 0..kw {
                            let r = (oh * geo.stride.0) as i64 - ph + (y * geo.dilation.0) as i64;
                            let col = (ow * geo.stride.1) as i64 - pw + (x * geo.dilation.1) as i64;
                            acc += sample(data, c, (r, col), geo.fractional_stride)
                                * weights.at(k, i, y, x);
                        }
                    }
                }
                out.set(k, oh, ow, acc);
            }
        }
    }
    out
}

/// 1-D convolution at full precision. Output shape is `[out_channels, len, 1]`.
#[must_use]
pub fn conv1d(
    data: &Tensor,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
    out_shape: Shape,
    stride: usize,
    pad: usize,
    dilation: usize,
    groups: usize,
) -> Tensor {
    let k_len = weights.kernel().0;
    let out_per_group = out_shape.channels / groups;
    let mut out = Tensor::zeros(out_shape);
    for k in 0..out_shape.channels {
        let group = k / out_per_group;
        for o in 0..out_shape.rows {
            let mut acc = bias.map_or(0, |b| b[k]);
            for i in 0..weights.in_per_group() {
                let c = group * weights.in_per_group() + i;
                for y in 0..k_len {
                    let pos = (o * stride) as i64 - pad as i64 + (y * dilation) as i64;
                    if pos >= 0 && (pos as usize) < data.shape().rows {
                        acc += data.get(c, pos as usize, 0) * weights.at(k, i, y, 0);
                    }
                }
            }
            out.set(k, o, 0, acc);
        }
    }
    out
}

/// Full-precision dot products for a linear layer.
#[must_use]
pub fn linear(data: &[i64], weights: &LinearWeights, bias: Option<&[i64]>) -> Vec<i64> {
    (0..weights.out_features())
        .map(|o| {
            let mut acc = bias.map_or(0, |b| b[o]);
            for (i, &v) in data.iter().enumerate() {
                acc += v * weights.at(o, i);
            }
            acc
        })
        .collect()
}

/// Pool one window, clipped at the input edge. Average pooling divides by the
/// actual element count; `floor` truncates toward zero (matching the
/// hardware's integer conversion), otherwise the average rounds to nearest.
fn pool_window(
    data: &Tensor,
    c: usize,
    origin: (usize, usize),
    pool: (usize, usize),
    average: bool,
    floor: bool,
) -> i64 {
    let r_end = (origin.0 + pool.0).min(data.shape().rows);
    let c_end = (origin.1 + pool.1).min(data.shape().cols);
    if average {
        let mut sum = 0;
        let mut count = 0;
        for r in origin.0..r_end {
            for col in origin.1..c_end {
                sum += data.get(c, r, col);
                count += 1;
            }
        }
        if floor {
            sum / count // truncates toward zero
        } else {
            div_floor(2 * sum + count, 2 * count) // floor(sum/count + 1/2)
        }
    } else {
        let mut max = i64::MIN;
        for r in origin.0..r_end {
            for col in origin.1..c_end {
                max = max.max(data.get(c, r, col));
            }
        }
        max
    }
}

/// 2-D pooling into `pooled` extent (computed by the caller with the
/// hardware's `(in + stride - pool) / stride` rule).
#[must_use]
pub fn pool2d(
    data: &Tensor,
    pooled: Shape,
    pool: (usize, usize),
    stride: (usize, usize),
    average: bool,
    floor: bool,
) -> Tensor {
    let mut out = Tensor::zeros(pooled);
    for c in 0..pooled.channels {
        for r in 0..pooled.rows {
            for col in 0..pooled.cols {
                let origin = (r * stride.0, col * stride.1);
                out.set(c, r, col, pool_window(data, c, origin, pool, average, floor));
            }
        }
    }
    out
}

/// 1-D pooling along the row axis; output shape is `[channels, len, 1]`.
#[must_use]
pub fn pool1d(
    data: &Tensor,
    pooled: Shape,
    pool: usize,
    stride: usize,
    average: bool,
    floor: bool,
) -> Tensor {
    let mut out = Tensor::zeros(pooled);
    for c in 0..pooled.channels {
        for r in 0..pooled.rows {
            out.set(
                c,
                r,
                0,
                pool_window(data, c, (r * stride, 0), (pool, 1), average, floor),
            );
        }
    }
    out
}

/// Element-wise combination of `operands` at full precision.
#[must_use]
pub fn eltwise(operator: EltwiseOp, operands: &[Tensor]) -> Tensor {
    let mut out = operands[0].clone();
    let shape = out.shape();
    for other in &operands[1..] {
        for c in 0..shape.channels {
            for r in 0..shape.rows {
                for col in 0..shape.cols {
                    let a = out.get(c, r, col);
                    let b = other.get(c, r, col);
                    let v = match operator {
                        EltwiseOp::Add => a + b,
                        EltwiseOp::Sub => a - b,
                        EltwiseOp::Mul => a * b,
                        EltwiseOp::Or => a | b,
                        EltwiseOp::Xor => a ^ b,
                    };
                    out.set(c, r, col, v);
                }
            }
        }
    }
    out
}
