//! Fixed-point arithmetic primitives.
//!
//! These reproduce the accelerator's output stage bit for bit. The hardware
//! divides the wide accumulator by `128 / 2^shift` with round-half-up, then
//! saturates to the output width. The round-half-up division is done here
//! with exact integer arithmetic (arithmetic shift as floor division) so tie
//! cases match the silicon; a float rendition would not.

/// `floor(0.5 + value / (128 / 2^shift))`, the hardware output scaler.
///
/// `shift` is the layer's output shift, positive values scale up. For
/// `shift > 7` the divisor is below one and the operation becomes an exact
/// left shift.
#[must_use]
pub fn scale_and_round(value: i64, shift: i32) -> i64 {
    let k = 7 - shift;
    if k <= 0 {
        value << -k
    } else {
        // floor((v + 2^(k-1)) / 2^k); arithmetic shift rounds toward -inf
        (value + (1 << (k - 1))) >> k
    }
}

/// Saturate to the signed `bits`-bit range `[-2^(bits-1), 2^(bits-1)-1]`.
#[must_use]
pub fn saturate(value: i64, bits: u32) -> i64 {
    let max = (1_i64 << (bits - 1)) - 1;
    value.clamp(-max - 1, max)
}

/// Output scaler and saturation combined.
#[must_use]
pub fn quantize(value: i64, shift: i32, bits: u32) -> i64 {
    saturate(scale_and_round(value, shift), bits)
}

/// Scale bias values by the device's bias divisor to align them with the
/// accumulator's extra fractional bits.
#[must_use]
pub fn scale_bias(bias: &[i64], divisor: i64) -> Vec<i64> {
    bias.iter().map(|&b| b * divisor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_zero_divides_by_128() {
        assert_eq!(scale_and_round(128, 0), 1);
        assert_eq!(scale_and_round(127, 0), 1); // 0.992 rounds up
        assert_eq!(scale_and_round(63, 0), 0);
        assert_eq!(scale_and_round(64, 0), 1); // exact tie rounds up
        assert_eq!(scale_and_round(-64, 0), 0); // -0.5 rounds toward +inf
        assert_eq!(scale_and_round(-65, 0), -1);
    }

    #[test]
    fn positive_shift_halves_divisor() {
        // shift 1: divide by 64
        assert_eq!(scale_and_round(64, 1), 1);
        assert_eq!(scale_and_round(32, 1), 1); // tie
        assert_eq!(scale_and_round(31, 1), 0);
        // shift 7: divide by 1
        assert_eq!(scale_and_round(5, 7), 5);
        // shift 8: multiply by 2
        assert_eq!(scale_and_round(5, 8), 10);
    }

    #[test]
    fn negative_shift_widens_divisor() {
        // shift -1: divide by 256
        assert_eq!(scale_and_round(255, -1), 1);
        assert_eq!(scale_and_round(128, -1), 1); // tie
        assert_eq!(scale_and_round(127, -1), 0);
    }

    #[test]
    fn saturate_8_bit() {
        assert_eq!(saturate(200, 8), 127);
        assert_eq!(saturate(-200, 8), -128);
        assert_eq!(saturate(5, 8), 5);
    }

    #[test]
    fn quantize_combined() {
        assert_eq!(quantize(1_000_000, 0, 8), 127);
        assert_eq!(quantize(-1_000_000, 0, 8), -128);
        assert_eq!(quantize(256, 0, 8), 2);
    }
}
