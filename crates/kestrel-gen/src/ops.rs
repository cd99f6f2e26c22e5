//! Operation streams emitted by the unload and verify generators.
//!
//! The generators do not render host code directly; they emit a flat list of
//! operations that a backend turns into C, assembly or a test vector file.
//! Every address-bearing op carries the final bus address so backends stay
//! purely syntactic.

/// One step of the generated unload routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadOp {
    /// Point the read cursor at an absolute bus address.
    SetReadAddress {
        /// Absolute source address.
        addr: u32,
    },
    /// Fetch one 32-bit word at the read cursor and advance it.
    FetchWord,
    /// Set the output-buffer element offset.
    SetWriteOffset {
        /// Element offset into the caller's output buffer.
        offs: u32,
    },
    /// Advance the output-buffer element offset by one.
    BumpWriteOffset,
    /// Store byte lane `shift` of the fetched word at the current offset
    /// plus `lane_spread` elements.
    StoreByte {
        /// Byte lane within the fetched word (0..=3).
        shift: u8,
        /// Extra element offset separating the four lanes' channels.
        lane_spread: u32,
    },
    /// Store byte lane `shift` at the streaming cursor and advance it.
    /// Used for outputs with a single spatial position.
    StoreByteStreaming {
        /// Byte lane within the fetched word (0..=3).
        shift: u8,
    },
    /// Copy a full 32-bit word from the read cursor to the streaming cursor,
    /// advancing both.
    CopyWord,
    /// Bind the mlator control and data registers for the current group.
    SetMlatorBase {
        /// Group control register address.
        ctl: u32,
        /// Mlator data register address.
        mlat: u32,
    },
    /// Start-of-channel marker for readability of the rendered stream.
    ChannelMarker {
        /// Logical output channel.
        channel: usize,
    },
    /// Program the SRAM read start address into the write-pointer register.
    SetMlatorWritePointer {
        /// Register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Program the mlator pointer increment.
    SetMlatorIncrement {
        /// Register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Enable the mlator, load its write pointer and select a byte lane.
    EnableMlator {
        /// Group control register address.
        addr: u32,
        /// Word value.
        value: u32,
        /// Selected byte lane (0..=3).
        shift: u8,
    },
    /// Turn the mlator off.
    DisableMlator {
        /// Group control register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Discarded read that primes the mlator pipeline.
    PrimeMlator {
        /// Mlator data register address.
        addr: u32,
    },
    /// Read one packed word from the mlator data register into the output
    /// buffer, advancing the word cursor.
    ReadMlator {
        /// Logical output channel.
        channel: usize,
        /// Spatial row.
        row: usize,
        /// First spatial column of the packed word.
        col: usize,
    },
}

/// One expected-memory check word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckWord {
    /// Address to read back.
    pub addr: u32,
    /// Expected word value.
    pub value: u32,
    /// Valid bytes within the word.
    pub num_bytes: usize,
    /// Byte lane of the first channel within its quad.
    pub first_proc: usize,
    /// True if this word belongs to the network's final output.
    pub is_final_output: bool,
    /// First logical channel packed into the word.
    pub channel: usize,
    /// Spatial row.
    pub row: usize,
    /// Spatial column.
    pub col: usize,
}

/// One step of the generated verify routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOp {
    /// Compare a memory word against its expected value.
    Check(CheckWord),
    /// Program the SRAM read start address into the write-pointer register.
    SetMlatorWritePointer {
        /// Register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Program the mlator pointer increment.
    SetMlatorIncrement {
        /// Register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Enable the mlator, load its write pointer and select a byte lane.
    EnableMlator {
        /// Group control register address.
        addr: u32,
        /// Word value.
        value: u32,
        /// Selected byte lane (0..=3).
        shift: u8,
    },
    /// Turn the mlator off.
    DisableMlator {
        /// Group control register address.
        addr: u32,
        /// Word value.
        value: u32,
    },
    /// Discarded read that primes the mlator pipeline.
    PrimeMlator {
        /// Mlator data register address.
        addr: u32,
    },
    /// Marker noting that further checks were dropped after `max_count`.
    Truncated,
}
