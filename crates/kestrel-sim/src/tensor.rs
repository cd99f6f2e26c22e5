//! Signed integer tensors in (channel, row, col) order.
//!
//! All simulator values are `i64`: wide enough for the full-precision
//! accumulator of any supported layer, so intermediate results never clip
//! until the explicit quantization step.

use crate::error::{KestrelSimError, Result};
use std::fmt;

/// Tensor extent, (channel, row, col).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// Channel count.
    pub channels: usize,
    /// Row count.
    pub rows: usize,
    /// Column count.
    pub cols: usize,
}

impl Shape {
    /// Create a shape.
    #[must_use]
    pub const fn new(channels: usize, rows: usize, cols: usize) -> Self {
        Self { channels, rows, cols }
    }

    /// Total element count.
    #[must_use]
    pub const fn elements(&self) -> usize {
        self.channels * self.rows * self.cols
    }

    /// Spatial element count (rows × cols).
    #[must_use]
    pub const fn spatial(&self) -> usize {
        self.rows * self.cols
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.rows, self.cols)
    }
}

/// Dense 3-D tensor of signed integers, row-major within each channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<i64>,
}

impl Tensor {
    /// All-zero tensor.
    #[must_use]
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0; shape.elements()],
        }
    }

    /// Tensor from a flat (channel-major, then row-major) vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length does not match the shape.
    pub fn new(shape: Shape, data: Vec<i64>) -> Result<Self> {
        if data.len() != shape.elements() {
            return Err(KestrelSimError::TensorShape {
                shape: shape.to_string(),
                expected: shape.elements(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Tensor extent.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Element at (channel, row, col).
    #[must_use]
    pub fn get(&self, c: usize, r: usize, col: usize) -> i64 {
        self.data[(c * self.shape.rows + r) * self.shape.cols + col]
    }

    /// Store element at (channel, row, col).
    pub fn set(&mut self, c: usize, r: usize, col: usize, value: i64) {
        self.data[(c * self.shape.rows + r) * self.shape.cols + col] = value;
    }

    /// Flat view of the data.
    #[must_use]
    pub fn data(&self) -> &[i64] {
        &self.data
    }

    /// Apply `f` to every element in place.
    pub fn map_inplace(&mut self, f: impl Fn(i64) -> i64) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }

    /// Strided spatial subsampling, keeping every `stride`-th row/col.
    #[must_use]
    pub fn subsample(&self, stride: (usize, usize)) -> Self {
        let rows = self.shape.rows.div_ceil(stride.0);
        let cols = self.shape.cols.div_ceil(stride.1);
        let shape = Shape::new(self.shape.channels, rows, cols);
        let mut out = Self::zeros(shape);
        for c in 0..shape.channels {
            for r in 0..rows {
                for col in 0..cols {
                    out.set(c, r, col, self.get(c, r * stride.0, col * stride.1));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_row_major() {
        let t = Tensor::new(Shape::new(2, 2, 3), (0..12).collect()).unwrap();
        assert_eq!(t.get(0, 0, 0), 0);
        assert_eq!(t.get(0, 1, 2), 5);
        assert_eq!(t.get(1, 0, 0), 6);
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(Tensor::new(Shape::new(1, 2, 2), vec![0; 3]).is_err());
    }

    #[test]
    fn subsample_stride_two() {
        let t = Tensor::new(Shape::new(1, 4, 4), (0..16).collect()).unwrap();
        let s = t.subsample((2, 2));
        assert_eq!(s.shape(), Shape::new(1, 2, 2));
        assert_eq!(s.data(), &[0, 2, 8, 10]);
    }
}
