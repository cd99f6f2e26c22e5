//! Device capability profiles.
//!
//! Two shipping parts share the same group/lane geometry but differ in the
//! bias pre-scaler and in whether the bias memory can be fed while a layer is
//! streaming. The profiles are compile-time constants; all downstream code is
//! parameterized over a `&Device` so tests can substitute reduced geometries.

/// Capability table for one Kestrel part.
///
/// All sizes are in bytes unless noted. `instance_size` is in 32-bit words to
/// match the hardware's address-generation units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Part name as printed on the package.
    pub name: &'static str,

    /// Number of groups (each group owns one bias memory).
    pub groups: usize,

    /// Processing lanes per group.
    pub procs_per_group: usize,

    /// Processors sharing one data-memory instance.
    pub shared_procs: usize,

    /// Bias memory capacity per group, bytes.
    pub bias_size: usize,

    /// Pre-scaler applied to bias values before accumulation, to align the
    /// bias scale with the accumulator's extra fractional bits.
    pub bias_div: i64,

    /// Data-memory instance size, 32-bit words.
    pub instance_size: usize,

    /// Address stride between consecutive groups.
    pub group_offs: u32,

    /// Data SRAM base, relative to the peripheral-bus base.
    pub sram_base: u32,

    /// Bias memory base, relative to the peripheral-bus base.
    pub bram_base: u32,

    /// Peripheral-bus base address as seen by the host.
    pub apb_base: u32,

    /// Ready-source selector programmed into the group control register.
    pub ready_sel: u32,

    /// True if the bias memory can be written while a layer streams.
    /// Parts without this need a placeholder byte on layer 0 (errata).
    pub streaming_bias: bool,
}

impl Device {
    /// First-generation part. No streaming-bias support, unit bias scale.
    pub const KN1000: Self = Self {
        name: "KN1000",
        groups: 4,
        procs_per_group: 16,
        shared_procs: 4,
        bias_size: 512,
        bias_div: 1,
        instance_size: 0x800,
        group_offs: 0x0040_0000,
        sram_base: 0x0030_0000,
        bram_base: 0x0018_0000,
        apb_base: 0x5000_0000,
        ready_sel: 3,
        streaming_bias: false,
    };

    /// Second-generation part. Streaming bias works; the wider accumulator
    /// carries 7 extra fractional bits, hence the 128x bias pre-scale.
    pub const KN2000: Self = Self {
        name: "KN2000",
        groups: 4,
        procs_per_group: 16,
        shared_procs: 4,
        bias_size: 2048,
        bias_div: 128,
        instance_size: 0x2800,
        group_offs: 0x0040_0000,
        sram_base: 0x0030_0000,
        bram_base: 0x0018_0000,
        apb_base: 0x5100_0000,
        ready_sel: 3,
        streaming_bias: true,
    };

    /// Total processing lanes across all groups.
    #[must_use]
    pub const fn max_proc(&self) -> usize {
        self.groups * self.procs_per_group
    }

    /// Bitmask covering every lane of one group.
    #[must_use]
    pub const fn group_mask(&self) -> u64 {
        (1 << self.procs_per_group) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kn1000_geometry() {
        let dev = Device::KN1000;
        assert_eq!(dev.max_proc(), 64);
        assert_eq!(dev.group_mask(), 0xffff);
        assert!(!dev.streaming_bias);
    }

    #[test]
    fn kn2000_bias_scale() {
        assert_eq!(Device::KN2000.bias_div, 128);
        assert!(Device::KN2000.streaming_bias);
    }
}
