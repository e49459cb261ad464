//! Fixed-point numbers for snapshot state.
//!
//! Floating point is allowed in snapshots (it is written bit-exactly) but
//! simulation state that must evolve identically across machines should use
//! these types. Both are written as their raw two's-complement bits.

use fixed::types::{I16F16, I32F32};

/// Q32.32: 32 integer bits, 32 fractional bits. Written as an `i64`.
pub type Fixed64 = I32F32;

/// Q16.16 for compact fields. Written as an `i32`.
pub type Fixed32 = I16F16;

/// Build a Fixed64 from a float. For literals and test setup only.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Build a Fixed32 from a float. For literals and test setup only.
#[inline]
pub fn f64_to_fixed32(v: f64) -> Fixed32 {
    Fixed32::from_num(v)
}

#[inline]
pub fn fixed32_to_f64(v: Fixed32) -> f64 {
    v.to_num::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed64_bits_are_q32_32() {
        assert_eq!(f64_to_fixed64(1.0).to_bits(), 1i64 << 32);
        assert_eq!(f64_to_fixed64(-0.5).to_bits(), -(1i64 << 31));
    }

    #[test]
    fn fixed32_bits_are_q16_16() {
        assert_eq!(f64_to_fixed32(1.0).to_bits(), 1i32 << 16);
    }

    #[test]
    fn conversions_are_exact_for_dyadic_values() {
        for v in [0.0, 1.5, -2.25, 1024.125] {
            assert_eq!(fixed64_to_f64(f64_to_fixed64(v)), v);
            assert_eq!(fixed32_to_f64(f64_to_fixed32(v)), v);
        }
    }

    #[test]
    fn sample_helpers_use_the_same_conversions() {
        assert_eq!(crate::test_utils::fixed(3.25), f64_to_fixed64(3.25));
        assert_eq!(crate::test_utils::fixed32(0.25).to_bits(), 1i32 << 14);
    }

    #[test]
    fn arithmetic_is_bit_reproducible() {
        let a = f64_to_fixed64(0.1);
        let b = f64_to_fixed64(0.2);
        let first = (a + b) * a;
        let second = (a + b) * a;
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
