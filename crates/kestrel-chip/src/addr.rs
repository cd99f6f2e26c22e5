//! Logical-to-physical address mapping for layer output data.
//!
//! Output data lives in the data-memory instance of the processor that
//! computed it. A word holds up to four adjacent channels (one byte per
//! processor of a shared-memory quad), spatial positions are consecutive
//! words, and expansion passes of the same processor interleave after the
//! spatial extent. The mapping below is the single source of truth for both
//! the unload and the verify traversals; the exact expression matches the
//! hardware address generator and must not be "simplified".

use crate::{Device, ProcMap};

/// Memory-layout parameters of one layer's output.
#[derive(Debug, Clone, Copy)]
pub struct OutputLayout {
    /// Active output lanes.
    pub processor_map: ProcMap,
    /// Byte offset of the output region within the data SRAM.
    pub out_offset: u32,
    /// Number of expansion passes (channels beyond one pass wrap onto the
    /// same processors).
    pub out_expand: usize,
    /// Channels per expansion pass.
    pub out_expand_thresh: usize,
    /// Output element width in bits (8 or 32).
    pub output_width: usize,
    /// Extra word stride between consecutive spatial elements (0 = dense).
    pub write_gap: usize,
}

impl OutputLayout {
    /// Output element size in bytes.
    #[must_use]
    pub const fn out_size(&self) -> usize {
        self.output_width / 8
    }

    /// Word pitch of one spatial position across expansion passes.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.out_expand * self.out_size()
    }

    /// First channel's quad-aligned lane; traversals start here.
    #[must_use]
    pub fn coffs_start(&self, dev: &Device) -> usize {
        self.processor_map.first() & !(dev.shared_procs - 1)
    }

    /// Physical byte offset of the word holding spatial position `doffs`
    /// (row-major) of expansion pass `expand`, as produced by processor quad
    /// leader `proc`. Relative to the data SRAM base.
    #[must_use]
    pub fn data_offset(&self, dev: &Device, proc: usize, doffs: usize, expand: usize) -> u32 {
        let instance = (proc % dev.procs_per_group) as u32 * dev.instance_size as u32;
        let group = (proc / dev.procs_per_group) as u32 * (dev.group_offs / 4);
        let element = (doffs * self.width() + expand * self.out_size()) * (self.write_gap + 1);
        self.out_offset + ((instance | group) + element as u32) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(map: u64, offset: u32) -> OutputLayout {
        OutputLayout {
            processor_map: ProcMap(map),
            out_offset: offset,
            out_expand: 1,
            out_expand_thresh: 64,
            output_width: 8,
            write_gap: 0,
        }
    }

    #[test]
    fn quad_aligned_start() {
        let dev = Device::KN1000;
        assert_eq!(layout(0b0100, 0).coffs_start(&dev), 0);
        assert_eq!(layout(0b1_0000_0000, 0).coffs_start(&dev), 8);
    }

    #[test]
    fn dense_offsets_advance_by_words() {
        let dev = Device::KN1000;
        let l = layout(0xf, 0x4000);
        assert_eq!(l.data_offset(&dev, 0, 0, 0), 0x4000);
        assert_eq!(l.data_offset(&dev, 0, 1, 0), 0x4004);
        assert_eq!(l.data_offset(&dev, 0, 2, 0), 0x4008);
    }

    #[test]
    fn group_and_instance_strides() {
        let dev = Device::KN1000;
        let l = layout(0xf, 0);
        // Quad 1 of group 0: one instance up.
        assert_eq!(l.data_offset(&dev, 4, 0, 0), dev.instance_size as u32 * 4 * 4);
        // Group 1, quad 0.
        assert_eq!(l.data_offset(&dev, 16, 0, 0), dev.group_offs);
    }

    #[test]
    fn write_gap_spreads_spatial_elements() {
        let dev = Device::KN1000;
        let mut l = layout(0xf, 0);
        l.write_gap = 1;
        assert_eq!(l.data_offset(&dev, 0, 1, 0), 8);
        assert_eq!(l.data_offset(&dev, 0, 2, 0), 16);
    }

    #[test]
    fn expansion_interleaves_within_pitch() {
        let dev = Device::KN1000;
        let mut l = layout(0xf, 0);
        l.out_expand = 2;
        // width = 2 words per spatial position; pass 1 lands one word after pass 0.
        assert_eq!(l.data_offset(&dev, 0, 0, 1), 4);
        assert_eq!(l.data_offset(&dev, 0, 1, 0), 8);
    }
}
