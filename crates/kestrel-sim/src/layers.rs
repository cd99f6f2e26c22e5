//! Per-layer configuration types.
//!
//! A `LayerParameters` value is created once from the network description and
//! never mutated during simulation. Defaults correspond to a plain 3x3
//! same-padding convolution with 8-bit output.

use crate::fixedpoint::saturate;

/// Layer operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Identity bypass.
    Passthrough,
    /// 1-D convolution.
    Conv1d,
    /// 2-D convolution.
    Conv2d,
    /// Fractionally strided (transposed) 2-D convolution.
    ConvTranspose2d,
    /// Software fully connected layer.
    Linear,
}

/// Output activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Clip to `[0, 2^(bits-1)-1]`.
    Relu,
    /// Absolute value, then clip to `[0, 2^(bits-1)-1]`.
    Abs,
}

impl Activation {
    /// Apply to one already-quantized value.
    #[must_use]
    pub fn apply(self, value: i64, bits: u32) -> i64 {
        let max = (1_i64 << (bits - 1)) - 1;
        match self {
            Self::Relu => value.clamp(0, max),
            Self::Abs => saturate(value.abs(), bits).clamp(0, max),
        }
    }
}

/// Element-wise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EltwiseOp {
    /// Sum of all operands.
    Add,
    /// First operand minus all others.
    Sub,
    /// Product of all operands (rescaled like a convolution output).
    Mul,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
}

/// Pooling configuration. `pool == (1, 1)` means stride-only subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pooling {
    /// Pooling window (rows, cols).
    pub pool: (usize, usize),
    /// Pooling stride (rows, cols).
    pub stride: (usize, usize),
    /// Average pooling instead of max pooling.
    pub average: bool,
    /// Round the average to nearest instead of truncating.
    pub rounding: bool,
}

/// Immutable per-layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerParameters {
    /// Operation kind.
    pub operation: Operation,
    /// Kernel extent (rows, cols); `(k, 1)` for 1-D.
    pub kernel_size: (usize, usize),
    /// Zero padding per axis.
    pub padding: (usize, usize),
    /// Kernel dilation per axis.
    pub dilation: (usize, usize),
    /// Convolution stride per axis.
    pub stride: (usize, usize),
    /// Fractional stride (transposed convolution only).
    pub fractional_stride: (usize, usize),
    /// Output padding (transposed convolution only).
    pub output_padding: (usize, usize),
    /// Grouped-convolution group count.
    pub groups: usize,
    /// Output channel count.
    pub output_channels: usize,
    /// Output shift applied by the output scaler.
    pub output_shift: i32,
    /// Output element width in bits (8 or 32; 32 skips quantization).
    pub output_width: usize,
    /// Optional activation.
    pub activation: Option<Activation>,
    /// Optional pooling stage ahead of the operation.
    pub pooling: Option<Pooling>,
    /// Input operand count (element-wise layers take several).
    pub operands: usize,
    /// Element-wise operator, if this layer combines operands.
    pub eltwise: Option<EltwiseOp>,
    /// Signed output range in bits after quantization.
    pub bits: u32,
}

impl Default for LayerParameters {
    fn default() -> Self {
        Self {
            operation: Operation::Conv2d,
            kernel_size: (3, 3),
            padding: (1, 1),
            dilation: (1, 1),
            stride: (1, 1),
            fractional_stride: (1, 1),
            output_padding: (0, 0),
            groups: 1,
            output_channels: 1,
            output_shift: 0,
            output_width: 8,
            activation: None,
            pooling: None,
            operands: 1,
            eltwise: None,
            bits: 8,
        }
    }
}

impl LayerParameters {
    /// Plain 2-D convolution with `output_channels` outputs.
    #[must_use]
    pub fn conv2d(output_channels: usize) -> Self {
        Self {
            output_channels,
            ..Self::default()
        }
    }

    /// Software linear layer (`bits` defaults to the wider 16-bit range).
    #[must_use]
    pub fn linear(output_channels: usize) -> Self {
        Self {
            operation: Operation::Linear,
            output_channels,
            bits: 16,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clips_both_sides() {
        assert_eq!(Activation::Relu.apply(-5, 8), 0);
        assert_eq!(Activation::Relu.apply(130, 8), 127);
        assert_eq!(Activation::Relu.apply(100, 8), 100);
    }

    #[test]
    fn abs_folds_negatives() {
        assert_eq!(Activation::Abs.apply(-5, 8), 5);
        assert_eq!(Activation::Abs.apply(-128, 8), 127);
    }
}
