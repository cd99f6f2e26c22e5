#![deny(unsafe_code)]

//! Bit-exact fixed-point simulator for Kestrel CNN accelerator layers.
//!
//! The simulator reproduces, bit for bit, what the accelerator computes for a
//! quantized network: wide-accumulator convolution/pooling/element-wise/linear
//! kernels followed by the hardware's round-half-up output scaler, signed
//! saturation and activation. Its outputs serve as the reference tensors the
//! generated verify routines check the silicon against, so every rounding and
//! clipping rule here is hardware-defined and deliberate.
//!
//! # Example
//!
//! ```
//! use kestrel_sim::{conv2d_layer, ConvWeights, LayerParameters, Shape, Stats, Tensor};
//!
//! # fn main() -> kestrel_sim::Result<()> {
//! let params = LayerParameters::conv2d(1);
//! let input = Tensor::zeros(Shape::new(1, 4, 4));
//! let weights = ConvWeights::new(0, 1, 1, (3, 3), vec![1; 9])?;
//! let mut stats = Stats::new();
//! let (output, shape) = conv2d_layer(
//!     0, &params, input.shape(), &weights, None, &input, 1, &mut stats)?;
//! assert_eq!(shape, Shape::new(1, 4, 4));
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_arguments)]

pub mod compute;
mod error;
mod fixedpoint;
mod layers;
mod simulate;
mod stats;
mod tensor;
mod weights;

pub use error::{KestrelSimError, Result};
pub use fixedpoint::{quantize, saturate, scale_and_round, scale_bias};
pub use layers::{Activation, EltwiseOp, LayerParameters, Operation, Pooling};
pub use simulate::{
    conv1d_layer, conv2d_layer, convtranspose2d_layer, eltwise_layer, linear_layer,
    passthrough_layer, pooling_layer,
};
pub use stats::Stats;
pub use tensor::{Shape, Tensor};
pub use weights::{ConvWeights, LinearWeights};
