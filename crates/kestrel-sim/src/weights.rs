//! Quantized weight containers.
//!
//! Weights arrive from the (out-of-scope) checkpoint loader already
//! quantized; these containers only pin down the index order the compute
//! kernels rely on.

use crate::error::{KestrelSimError, Result};

/// Convolution kernels, `[out_channel][in_channel_per_group][kh][kw]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvWeights {
    out_channels: usize,
    in_per_group: usize,
    kernel: (usize, usize),
    data: Vec<i64>,
}

impl ConvWeights {
    /// Build from a flat vector in `[o][i][kh][kw]` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length does not match the dimensions.
    pub fn new(
        layer: usize,
        out_channels: usize,
        in_per_group: usize,
        kernel: (usize, usize),
        data: Vec<i64>,
    ) -> Result<Self> {
        let expected = out_channels * in_per_group * kernel.0 * kernel.1;
        if data.len() != expected {
            return Err(KestrelSimError::weight_shape(
                layer,
                format!(
                    "{}x{}x{}x{} kernel needs {expected} values, got {}",
                    out_channels,
                    in_per_group,
                    kernel.0,
                    kernel.1,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            out_channels,
            in_per_group,
            kernel,
            data,
        })
    }

    /// Output channel count.
    #[must_use]
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Input channels per convolution group.
    #[must_use]
    pub const fn in_per_group(&self) -> usize {
        self.in_per_group
    }

    /// Kernel extent (rows, cols).
    #[must_use]
    pub const fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    /// Kernel element.
    #[must_use]
    pub fn at(&self, o: usize, i: usize, kh: usize, kw: usize) -> i64 {
        self.data[((o * self.in_per_group + i) * self.kernel.0 + kh) * self.kernel.1 + kw]
    }
}

/// Linear layer weight matrix, `[out_feature][in_feature]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearWeights {
    out_features: usize,
    in_features: usize,
    data: Vec<i64>,
}

impl LinearWeights {
    /// Build from a flat row-major vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length does not match the dimensions.
    pub fn new(layer: usize, out_features: usize, in_features: usize, data: Vec<i64>) -> Result<Self> {
        if data.len() != out_features * in_features {
            return Err(KestrelSimError::weight_shape(
                layer,
                format!(
                    "{out_features}x{in_features} matrix needs {} values, got {}",
                    out_features * in_features,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            out_features,
            in_features,
            data,
        })
    }

    /// Output feature count.
    #[must_use]
    pub const fn out_features(&self) -> usize {
        self.out_features
    }

    /// Input feature count.
    #[must_use]
    pub const fn in_features(&self) -> usize {
        self.in_features
    }

    /// Matrix element.
    #[must_use]
    pub fn at(&self, o: usize, i: usize) -> i64 {
        self.data[o * self.in_features + i]
    }
}
