//! Error types for stream generation.

use crate::verify::MemRecord;
use thiserror::Error;

/// Result type alias for generator operations.
pub type Result<T> = std::result::Result<T, KestrelGenError>;

/// Errors raised while generating bias images or unload/verify streams.
#[derive(Debug, Error)]
pub enum KestrelGenError {
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

    /// No group has room for the layer's bias allocation.
    #[error("Layer {layer}: bias memory capacity exceeded - available groups: {groups:?}, used so far: {used:?}, needed: {needed}")]
    BiasCapacity {
        /// Offending layer index.
        layer: usize,
        /// Groups the layer was allowed to use.
        groups: Vec<usize>,
        /// Bytes already used per group.
        used: Vec<usize>,
        /// Bytes the layer needs.
        needed: usize,
    },

    /// A single group's bias memory overflowed during multi-group packing.
    #[error("Layer {layer}: bias memory capacity for group {group} exceeded, used so far: {used}")]
    BiasGroupCapacity {
        /// Offending layer index.
        layer: usize,
        /// Overflowing group.
        group: usize,
        /// Bytes already used in that group.
        used: usize,
    },

    /// Verify detected a write to already-claimed memory.
    #[error("Processor {processor}: layer {layer} output for CHW={channel},{row},{col} is overwriting offset 0x{offset:08x} previously written by {previous}")]
    Overwrite {
        /// Processor performing the write.
        processor: usize,
        /// Writing layer index.
        layer: usize,
        /// Logical channel being written.
        channel: usize,
        /// Logical row being written.
        row: usize,
        /// Logical column being written.
        col: usize,
        /// Physical byte offset of the collision.
        offset: u32,
        /// Prior owner of the address.
        previous: MemRecord,
    },

    /// Mlator unload cannot be combined with block-level verification.
    #[error("Layer {layer}: mlator unload cannot be combined with block-level verification")]
    MlatorBlocklevel {
        /// Offending layer index.
        layer: usize,
    },
}
