#![deny(unsafe_code)]

//! Hardware-programming stream generation for the Kestrel accelerator.
//!
//! Three generators turn a network configuration plus the simulator's
//! reference output into loadable artifacts: [`bias::pack`] builds the
//! per-group bias memory images and offset tables, [`unload`] emits the
//! operation stream that drains output memory into a host buffer, and
//! [`verify`] emits expected-value checks while tracking memory occupancy to
//! catch layers trampling each other's data.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bias;
mod error;
mod ops;
mod unload;
mod verify;

pub use bias::{BiasAllocation, BiasGroup, BiasLayer};
pub use error::{KestrelGenError, Result};
pub use ops::{CheckWord, UnloadOp, VerifyOp};
pub use unload::{unload, UnloadParams};
pub use verify::{verify, MemRecord, OccupancyMap, VerifyParams};
