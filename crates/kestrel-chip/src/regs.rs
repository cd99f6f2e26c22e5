//! Register addressing for the Kestrel accelerator.
//!
//! Each group exposes one block of global control registers followed by the
//! per-layer register file (one word per layer slot, per register). Only the
//! registers the generator programs are listed here; the full map lives in
//! the hardware databook.
//!
//! ```text
//! group base = group * GROUP_OFFS
//! ctl  regs  @ base + CTL_BASE  + reg * 4
//! lreg regs  @ base + LREG_BASE + (reg * MAX_LAYERS + layer) * 4
//! ```

use crate::Device;

/// Per-layer register slots per group.
pub const MAX_LAYERS: usize = 32;

/// Offset of the global control block within a group.
pub const CTL_BASE: u32 = 0x0010_0000;

/// Offset of the per-layer register file within a group.
pub const LREG_BASE: u32 = 0x0010_1000;

// ── Global control registers ─────────────────────────────────────────────────

/// Group master control.
pub const REG_CTL: usize = 0;
/// SRAM power/margin control.
pub const REG_SRAM: usize = 1;
/// Layer count for the group.
pub const REG_LCNT_MAX: usize = 2;
/// Mlator data register (channel-reordering read port).
pub const REG_MLAT: usize = 8;

// ── Per-layer registers ──────────────────────────────────────────────────────

/// SRAM write pointer base.
pub const LREG_WPTR_BASE: usize = 16;
/// Secondary layer control (write-pointer increment lives here).
pub const LREG_LCTL2: usize = 21;

// ── Group control register bits ──────────────────────────────────────────────

/// `REG_CTL` bit assignments used by the mlator sequences.
pub mod ctl {
    /// Ready-source selector field position.
    pub const READY_SEL_SHIFT: u32 = 1;
    /// Mlator enable.
    pub const MLATOR_EN: u32 = 1 << 3;
    /// Load the mlator write pointer from `LREG_WPTR_BASE`.
    pub const MLATOR_LOAD: u32 = 1 << 16;
    /// Byte-lane select field position (0..=3).
    pub const MLATOR_BYTE_SHIFT: u32 = 17;
}

/// Address of global control register `reg` in `group`, relative to the
/// peripheral-bus base.
#[must_use]
pub fn ctl_addr(dev: &Device, group: usize, reg: usize) -> u32 {
    dev.group_offs * group as u32 + CTL_BASE + (reg as u32) * 4
}

/// Address of per-layer register `reg` for layer 0 in `group`, relative to
/// the peripheral-bus base. The generator only ever reprograms layer slot 0
/// during unload.
#[must_use]
pub fn lreg_addr(dev: &Device, group: usize, reg: usize) -> u32 {
    dev.group_offs * group as u32 + LREG_BASE + ((reg * MAX_LAYERS) as u32) * 4
}

/// `REG_CTL` word that turns the mlator off.
#[must_use]
pub fn mlator_disable(dev: &Device) -> u32 {
    dev.ready_sel << ctl::READY_SEL_SHIFT | ctl::MLATOR_EN
}

/// `REG_CTL` word that enables the mlator, loads the write pointer and
/// selects byte lane `shift` (0..=3).
#[must_use]
pub fn mlator_enable(dev: &Device, shift: u32) -> u32 {
    dev.ready_sel << ctl::READY_SEL_SHIFT
        | ctl::MLATOR_LOAD
        | shift << ctl::MLATOR_BYTE_SHIFT
        | ctl::MLATOR_EN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_blocks_do_not_overlap() {
        let dev = Device::KN1000;
        let g0_last = ctl_addr(&dev, 0, REG_MLAT);
        let g1_first = ctl_addr(&dev, 1, REG_CTL);
        assert!(g0_last < g1_first);
        assert!(ctl_addr(&dev, 0, REG_MLAT) < lreg_addr(&dev, 0, LREG_WPTR_BASE));
    }

    #[test]
    fn mlator_words() {
        let dev = Device::KN1000;
        // ready_sel=3: disable = 3<<1 | 1<<3 = 0x0e
        assert_eq!(mlator_disable(&dev), 0x0e);
        // byte 2: 3<<1 | 1<<16 | 2<<17 | 1<<3
        assert_eq!(mlator_enable(&dev, 2), 0x3 << 1 | 1 << 16 | 2 << 17 | 1 << 3);
    }
}
