//! Per-layer simulation drivers.
//!
//! Each driver validates the layer configuration, runs the full-precision
//! kernel, then applies the output stage (scale, saturate, activate) and the
//! statistics accounting. Output shapes are always recomputed from the input
//! shape and layer parameters; downstream address mapping depends on them.

use crate::compute::{self, ConvGeometry};
use crate::error::{KestrelSimError, Result};
use crate::fixedpoint::{quantize, saturate, scale_and_round, scale_bias};
use crate::layers::{Activation, EltwiseOp, LayerParameters, Pooling};
use crate::stats::Stats;
use crate::tensor::{Shape, Tensor};
use crate::weights::{ConvWeights, LinearWeights};

fn check_conv_config(
    layer: usize,
    params: &LayerParameters,
    input_shape: Shape,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
) -> Result<()> {
    if weights.out_channels() != params.output_channels {
        return Err(KestrelSimError::weight_shape(
            layer,
            format!(
                "kernel has {} output channels, layer declares {}",
                weights.out_channels(),
                params.output_channels
            ),
        ));
    }
    if weights.in_per_group() * params.groups != input_shape.channels {
        return Err(KestrelSimError::weight_shape(
            layer,
            format!(
                "kernel covers {} input channels ({} per group x {} groups), input has {}",
                weights.in_per_group() * params.groups,
                weights.in_per_group(),
                params.groups,
                input_shape.channels
            ),
        ));
    }
    if let Some(b) = bias {
        if b.len() != params.output_channels {
            return Err(KestrelSimError::BiasLengthMismatch {
                layer,
                expected: params.output_channels,
                actual: b.len(),
            });
        }
    }
    Ok(())
}

/// Output stage shared by the convolution drivers: scale+saturate unless the
/// output is full 32-bit precision, then activation.
fn output_stage(
    out: &mut Tensor,
    out_shape: Shape,
    params: &LayerParameters,
    stats: &mut Stats,
) {
    if params.output_width != 32 {
        let shift = params.output_shift;
        let bits = params.bits;
        out.map_inplace(|v| quantize(v, shift, bits));
    }
    if let Some(act) = params.activation {
        let bits = params.bits;
        out.map_inplace(|v| act.apply(v, bits));
        stats.comp += out_shape.elements() as u64;
    }
}

/// Simulate one 2-D convolution layer.
///
/// # Errors
///
/// Returns an error on any weight/bias shape mismatch.
pub fn conv2d_layer(
    layer: usize,
    params: &LayerParameters,
    input_shape: Shape,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
    data: &Tensor,
    bias_div: i64,
    stats: &mut Stats,
) -> Result<(Tensor, Shape)> {
    check_conv_config(layer, params, input_shape, weights, bias)?;

    let (k0, k1) = params.kernel_size;
    let out_shape = Shape::new(
        params.output_channels,
        (input_shape.rows - params.dilation.0 * (k0 - 1) - 1 + 2 * params.padding.0)
            / params.stride.0
            + 1,
        (input_shape.cols - params.dilation.1 * (k1 - 1) - 1 + 2 * params.padding.1)
            / params.stride.1
            + 1,
    );
    tracing::debug!(layer, input = %input_shape, output = %out_shape, "conv2d");

    let scaled_bias = bias.map(|b| scale_bias(b, bias_div));
    let geo = ConvGeometry {
        stride: params.stride,
        pad: params.padding,
        dilation: params.dilation,
        fractional_stride: (1, 1),
        groups: params.groups,
    };
    let mut out = compute::conv2d(data, weights, scaled_bias.as_deref(), out_shape, &geo);

    stats.macc += ((input_shape.channels / params.groups) * k0 * k1 * out_shape.elements()) as u64;
    output_stage(&mut out, out_shape, params, stats);
    Ok((out, out_shape))
}

/// Simulate one fractionally strided (transposed) 2-D convolution layer.
///
/// # Errors
///
/// Returns an error on any weight/bias shape mismatch.
pub fn convtranspose2d_layer(
    layer: usize,
    params: &LayerParameters,
    input_shape: Shape,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
    data: &Tensor,
    bias_div: i64,
    stats: &mut Stats,
) -> Result<(Tensor, Shape)> {
    check_conv_config(layer, params, input_shape, weights, bias)?;

    let (k0, k1) = params.kernel_size;
    let (f0, f1) = params.fractional_stride;
    let out_shape = Shape::new(
        params.output_channels,
        (input_shape.rows - 1) * f0 - 2 * params.padding.0
            + params.dilation.0 * (k0 - 1)
            + params.output_padding.0
            + 1,
        (input_shape.cols - 1) * f1 - 2 * params.padding.1
            + params.dilation.1 * (k1 - 1)
            + params.output_padding.1
            + 1,
    );
    tracing::debug!(layer, input = %input_shape, output = %out_shape, "convtranspose2d");

    let scaled_bias = bias.map(|b| scale_bias(b, bias_div));
    let geo = ConvGeometry {
        stride: (1, 1),
        pad: params.padding,
        dilation: params.dilation,
        fractional_stride: params.fractional_stride,
        groups: params.groups,
    };
    let mut out = compute::conv2d(data, weights, scaled_bias.as_deref(), out_shape, &geo);

    stats.macc += ((input_shape.channels / params.groups) * k0 * k1 * out_shape.elements()) as u64;
    output_stage(&mut out, out_shape, params, stats);
    Ok((out, out_shape))
}

/// Simulate one 1-D convolution layer. The kernel length is
/// `params.kernel_size.0`; shapes use a trailing unit axis.
///
/// # Errors
///
/// Returns an error on any weight/bias shape mismatch.
pub fn conv1d_layer(
    layer: usize,
    params: &LayerParameters,
    input_shape: Shape,
    weights: &ConvWeights,
    bias: Option<&[i64]>,
    data: &Tensor,
    bias_div: i64,
    stats: &mut Stats,
) -> Result<(Tensor, Shape)> {
    check_conv_config(layer, params, input_shape, weights, bias)?;

    let k = params.kernel_size.0;
    let out_shape = Shape::new(
        params.output_channels,
        (input_shape.rows - params.dilation.0 * (k - 1) - 1 + 2 * params.padding.0)
            / params.stride.0
            + 1,
        1,
    );
    tracing::debug!(layer, input = %input_shape, output = %out_shape, "conv1d");

    let scaled_bias = bias.map(|b| scale_bias(b, bias_div));
    let mut out = compute::conv1d(
        data,
        weights,
        scaled_bias.as_deref(),
        out_shape,
        params.stride.0,
        params.padding.0,
        params.dilation.0,
        params.groups,
    );

    stats.macc += ((input_shape.channels / params.groups)
        * k
        * out_shape.channels
        * out_shape.rows) as u64;
    output_stage(&mut out, out_shape, params, stats);
    Ok((out, out_shape))
}

/// Simulate one software linear (classification) layer. Returns the feature
/// vector and its length.
///
/// # Errors
///
/// Returns an error on any weight/bias shape mismatch.
pub fn linear_layer(
    layer: usize,
    activation: Option<Activation>,
    bits: u32,
    weights: &LinearWeights,
    bias: Option<&[i64]>,
    data: &[i64],
    stats: &mut Stats,
) -> Result<(Vec<i64>, usize)> {
    if weights.in_features() != data.len() {
        return Err(KestrelSimError::weight_shape(
            layer,
            format!(
                "weight matrix takes {} input features, data has {}",
                weights.in_features(),
                data.len()
            ),
        ));
    }
    if let Some(b) = bias {
        if b.len() != weights.out_features() {
            return Err(KestrelSimError::BiasLengthMismatch {
                layer,
                expected: weights.out_features(),
                actual: b.len(),
            });
        }
    }
    tracing::debug!(layer, in_features = data.len(), out_features = weights.out_features(), "linear");

    let mut out = compute::linear(data, weights, bias);
    for v in &mut out {
        *v = saturate(scale_and_round(*v, 0), bits);
    }
    stats.sw_macc += (weights.in_features() * weights.out_features()) as u64;

    if let Some(act) = activation {
        for v in &mut out {
            *v = act.apply(*v, bits);
        }
        stats.sw_comp += weights.out_features() as u64;
    }
    let len = out.len();
    Ok((out, len))
}

/// Identity bypass layer.
#[must_use]
pub fn passthrough_layer(input_shape: Shape, data: &Tensor) -> (Tensor, Shape) {
    (data.clone(), input_shape)
}

/// Simulate one element-wise layer over `operands` equally shaped inputs.
/// Only multiplication is rescaled through the output scaler; the other
/// operators saturate directly.
///
/// # Errors
///
/// Returns an error if the operand count does not match.
pub fn eltwise_layer(
    operator: EltwiseOp,
    layer: usize,
    input_shape: Shape,
    output_shift: i32,
    data: &[Tensor],
    output_width: usize,
    operands: usize,
    stats: &mut Stats,
) -> Result<(Tensor, Shape)> {
    let bits = 8;
    if operands != data.len() {
        return Err(KestrelSimError::OperandMismatch {
            layer,
            expected: operands,
            actual: data.len(),
        });
    }
    tracing::debug!(layer, operands, ?operator, "eltwise");

    let mut out = compute::eltwise(operator, data);

    let ops = ((operands - 1) * input_shape.elements()) as u64;
    match operator {
        EltwiseOp::Add | EltwiseOp::Sub => stats.add += ops,
        EltwiseOp::Mul => stats.mul += ops,
        EltwiseOp::Or | EltwiseOp::Xor => stats.bitwise += ops,
    }

    if output_width != 32 {
        if operator == EltwiseOp::Mul {
            out.map_inplace(|v| quantize(v, output_shift, bits));
        } else {
            out.map_inplace(|v| saturate(v, bits));
        }
    }
    Ok((out, input_shape))
}

/// Simulate the pooling stage ahead of a layer's main operation. Returns one
/// pooled tensor per operand and the pooled shape. `one_dimensional` selects
/// the 1-D traversal used ahead of Conv1d.
pub fn pooling_layer(
    layer: usize,
    input_shape: Shape,
    pooling: &Pooling,
    data: &[Tensor],
    one_dimensional: bool,
    stats: &mut Stats,
) -> (Vec<Tensor>, Shape) {
    let (p0, p1) = pooling.pool;
    let (s0, s1) = pooling.stride;

    // Hardware rule: always apply the stride, even without a pooling window.
    let pooled_shape = if one_dimensional {
        Shape::new(input_shape.channels, (input_shape.rows + s0 - p0) / s0, 1)
    } else {
        Shape::new(
            input_shape.channels,
            (input_shape.rows + s0 - p0) / s0,
            (input_shape.cols + s1 - p1) / s1,
        )
    };

    if p0 > 1 || p1 > 1 {
        tracing::debug!(layer, input = %input_shape, pooled = %pooled_shape,
            average = pooling.average, "pooling");
        let floor = !pooling.rounding;
        if one_dimensional {
            let pooled = compute::pool1d(&data[0], pooled_shape, p0, s0, pooling.average, floor);
            let st = (p0 * pooled_shape.channels * pooled_shape.rows) as u64;
            if pooling.average {
                stats.add += st;
            } else {
                stats.comp += st;
            }
            (vec![pooled], pooled_shape)
        } else {
            let pooled: Vec<Tensor> = data
                .iter()
                .map(|t| compute::pool2d(t, pooled_shape, (p0, p1), (s0, s1), pooling.average, floor))
                .collect();
            let st = (p0 * p1 * pooled_shape.elements() * data.len()) as u64;
            if pooling.average {
                stats.add += st;
            } else {
                stats.comp += st;
            }
            (pooled, pooled_shape)
        }
    } else {
        // Stride-only subsampling
        let stride = if one_dimensional { (s0, 1) } else { (s0, s1) };
        let pooled: Vec<Tensor> = data.iter().map(|t| t.subsample(stride)).collect();
        (pooled, pooled_shape)
    }
}
