//! Processor-bitmask helpers.
//!
//! The processor map is a 64-bit mask with one bit per physical lane, group 0
//! in the low 16 bits. These helpers mirror the hardware documentation's
//! naming (`ffs`, `fls`) rather than the std method names.

/// Index of the least significant set bit, or `None` for an empty mask.
#[must_use]
pub fn ffs(x: u64) -> Option<usize> {
    if x == 0 {
        None
    } else {
        Some(x.trailing_zeros() as usize)
    }
}

/// Index of the most significant set bit, or `None` for an empty mask.
#[must_use]
pub fn fls(x: u64) -> Option<usize> {
    if x == 0 {
        None
    } else {
        Some(63 - x.leading_zeros() as usize)
    }
}

/// Number of set bits.
#[must_use]
pub fn popcount(x: u64) -> usize {
    x.count_ones() as usize
}

/// Position of the `n`th set bit (1-based `n`), or `None` if there are fewer
/// than `n` set bits. `nthone(2, 0xff00)` returns 9.
#[must_use]
pub fn nthone(n: usize, x: u64) -> Option<usize> {
    if n == 0 {
        return None;
    }
    let mut remaining = n;
    for bit in 0..64 {
        if x >> bit & 1 == 1 {
            remaining -= 1;
            if remaining == 0 {
                return Some(bit);
            }
        }
    }
    None
}

/// Processor bitmask for one layer's output, one bit per physical lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcMap(pub u64);

impl ProcMap {
    /// Empty map.
    pub const EMPTY: Self = Self(0);

    /// First active lane. Panics on an empty map; layer maps are validated
    /// non-empty before they reach address computation.
    #[must_use]
    pub fn first(self) -> usize {
        ffs(self.0).expect("processor map is empty")
    }

    /// Last active lane.
    #[must_use]
    pub fn last(self) -> usize {
        fls(self.0).expect("processor map is empty")
    }

    /// Active lane count.
    #[must_use]
    pub fn count(self) -> usize {
        popcount(self.0)
    }

    /// True if lane `proc` is active.
    #[must_use]
    pub fn contains(self, proc: usize) -> bool {
        self.0 >> proc & 1 == 1
    }

    /// Lanes of `group` (given `procs_per_group`) as a sub-mask in place.
    #[must_use]
    pub fn group_bits(self, group: usize, procs_per_group: usize) -> u64 {
        self.0 >> (group * procs_per_group) & ((1 << procs_per_group) - 1)
    }
}
