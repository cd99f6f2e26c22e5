//! Error types for the layer simulator.

use thiserror::Error;

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, KestrelSimError>;

/// Errors raised while simulating a layer. All of these are static
/// configuration mismatches; the network cannot be realized as described and
/// there is nothing to retry.
#[derive(Debug, Error)]
pub enum KestrelSimError {
    /// Bias vector length does not match the output channel count.
    #[error("Layer {layer}: output channel count {expected} does not match the number of bias values {actual}")]
    BiasLengthMismatch {
        /// Offending layer index.
        layer: usize,
        /// Output channel count.
        expected: usize,
        /// Bias value count.
        actual: usize,
    },

    /// Weight tensor dimensions do not match the layer configuration.
    #[error("Layer {layer}: weight shape mismatch: {reason}")]
    WeightShape {
        /// Offending layer index.
        layer: usize,
        /// Expected-vs-actual description.
        reason: String,
    },

    /// Operand count does not match the supplied input tensors.
    #[error("Layer {layer}: expected {expected} operand(s), got {actual}")]
    OperandMismatch {
        /// Offending layer index.
        layer: usize,
        /// Declared operand count.
        expected: usize,
        /// Supplied tensor count.
        actual: usize,
    },

    /// Tensor construction with inconsistent element count.
    #[error("Tensor data length {actual} does not match shape {shape} ({expected} elements)")]
    TensorShape {
        /// Shape description.
        shape: String,
        /// Elements the shape requires.
        expected: usize,
        /// Elements supplied.
        actual: usize,
    },
}

impl KestrelSimError {
    /// Create a weight shape error.
    pub fn weight_shape(layer: usize, reason: impl Into<String>) -> Self {
        Self::WeightShape {
            layer,
            reason: reason.into(),
        }
    }
}
