#![deny(unsafe_code)]

//! Hardware model for the Kestrel CNN accelerator family.
//!
//! The accelerator is organized as a small number of **groups**, each with its
//! own bias memory and a fixed set of processing lanes ("processors"). Every
//! four processors share one data-memory instance. A layer's output channels
//! are assigned to processors through a 64-bit processor bitmask; when the
//! channel count exceeds the available lanes, the surplus channels wrap back
//! onto the same processors in additional **expansion** passes.
//!
//! This crate carries no I/O: it models the chip constants, the register
//! addressing scheme, and the bijective mapping between logical tensor
//! coordinates and physical data-memory byte offsets. The simulator and the
//! code generator crates build on it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod addr;
mod bits;
mod device;
pub mod regs;

pub use addr::OutputLayout;
pub use bits::{ffs, fls, nthone, popcount, ProcMap};
pub use device::Device;
