//! Operation counters for the simulated network.
//!
//! Counters are accounting only and never influence simulation results. They
//! are threaded through the layer drivers as an explicit `&mut Stats` so a
//! caller owns exactly one accumulator per pipeline run.

use std::fmt;

/// Running operation counts across all simulated layers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Hardware multiply-accumulate operations.
    pub macc: u64,
    /// Hardware comparison operations (activation, max pooling).
    pub comp: u64,
    /// Hardware additions (element-wise add/sub, average pooling).
    pub add: u64,
    /// Hardware multiplications (element-wise multiply).
    pub mul: u64,
    /// Hardware bitwise operations (element-wise or/xor).
    pub bitwise: u64,
    /// Software-fallback multiply-accumulates (linear layers).
    pub sw_macc: u64,
    /// Software-fallback comparisons.
    pub sw_comp: u64,
}

impl Stats {
    /// Fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total hardware operations.
    #[must_use]
    pub const fn hw_total(&self) -> u64 {
        self.macc + self.comp + self.add + self.mul + self.bitwise
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MACC        : {}", self.macc)?;
        writeln!(f, "Comparisons : {}", self.comp)?;
        writeln!(f, "Additions   : {}", self.add)?;
        writeln!(f, "Multiplies  : {}", self.mul)?;
        writeln!(f, "Bitwise     : {}", self.bitwise)?;
        writeln!(f, "SW MACC     : {}", self.sw_macc)?;
        write!(f, "SW comp     : {}", self.sw_comp)
    }
}
