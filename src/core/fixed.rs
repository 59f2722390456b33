/*!
 * Fixed-Point Arithmetic
 *
 * Signed 17.14 scaled-integer reals for the MLFQS statistics. The scheduler
 * runs without hardware floating point; load average and recent CPU keep
 * fractional precision by storing value * 2^14 in an i32, widening to i64
 * for multiply and divide.
 */

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Number of fraction bits in the representation
pub const FRACTION_BITS: u32 = 14;

const SCALE: i32 = 1 << FRACTION_BITS;

/// A signed fixed-point real with 14 fraction bits
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    /// Convert an integer to fixed point
    #[inline]
    #[must_use]
    pub const fn from_int(n: i32) -> Self {
        Fixed(n * SCALE)
    }

    /// The fraction n/d as fixed point, truncated toward zero
    #[inline]
    #[must_use]
    pub const fn frac(n: i32, d: i32) -> Self {
        Fixed(n * SCALE / d)
    }

    /// Rebuild from a raw scaled representation
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    /// The raw scaled representation
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert to integer, truncating toward zero
    #[inline]
    #[must_use]
    pub const fn trunc(self) -> i32 {
        self.0 / SCALE
    }

    /// Convert to integer, rounding half away from zero
    #[inline]
    #[must_use]
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + SCALE / 2) / SCALE
        } else {
            (self.0 - SCALE / 2) / SCALE
        }
    }
}

impl Add for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Add<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn add(self, rhs: i32) -> Fixed {
        Fixed(self.0 + rhs * SCALE)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Sub<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn sub(self, rhs: i32) -> Fixed {
        Fixed(self.0 - rhs * SCALE)
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    /// Widening multiply: (x * y) / 2^14 in 64-bit intermediate
    #[inline]
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 as i64 * rhs.0 as i64 / SCALE as i64) as i32)
    }
}

impl Mul<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn mul(self, rhs: i32) -> Fixed {
        Fixed(self.0 * rhs)
    }
}

impl Div for Fixed {
    type Output = Fixed;

    /// Widening divide: (x * 2^14) / y in 64-bit intermediate
    #[inline]
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 as i64 * SCALE as i64 / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for Fixed {
    type Output = Fixed;

    #[inline]
    fn div(self, rhs: i32) -> Fixed {
        Fixed(self.0 / rhs)
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    #[inline]
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0 as f64 / SCALE as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_conversions() {
        assert_eq!(Fixed::from_int(5).trunc(), 5);
        assert_eq!(Fixed::from_int(-5).trunc(), -5);
        assert_eq!(Fixed::from_int(7).raw(), 7 * SCALE);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        let one_half = Fixed::frac(3, 2);
        assert_eq!(one_half.round(), 2);
        assert_eq!(one_half.trunc(), 1);

        let neg_half = Fixed::frac(-3, 2);
        assert_eq!(neg_half.round(), -2);
        assert_eq!(neg_half.trunc(), -1);

        assert_eq!(Fixed::frac(1, 4).round(), 0);
        assert_eq!(Fixed::frac(-1, 4).round(), 0);
    }

    #[test]
    fn test_arithmetic() {
        let a = Fixed::from_int(10);
        let b = Fixed::from_int(4);

        assert_eq!((a + b).trunc(), 14);
        assert_eq!((a - b).trunc(), 6);
        assert_eq!((a * Fixed::frac(1, 2)).trunc(), 5);
        assert_eq!((a / b).round(), 3);
        assert_eq!((a / 4).round(), 3);
        assert_eq!((a + 1).trunc(), 11);
        assert_eq!((a - 1).trunc(), 9);
        assert_eq!((-a).trunc(), -10);
    }

    #[test]
    fn test_widening_no_overflow() {
        // Products near the top of the range must widen through i64
        let big = Fixed::from_int(60_000);
        let half = Fixed::frac(1, 2);
        assert_eq!((big * half).trunc(), 30_000);
    }

    #[test]
    fn test_load_avg_first_step() {
        // load_avg = (59/60) * 0 + (1/60) * 1, then read out as x100 rounded
        let load = Fixed::frac(59, 60) * Fixed::ZERO + Fixed::frac(1, 60) * 1;
        assert_eq!(load.raw(), SCALE / 60);
        assert_eq!((load * 100).round(), 2);
    }

    #[test]
    fn test_decay_coefficient_below_one() {
        // (2*load)/(2*load + 1) < 1 for any non-negative load
        for n in 0..200 {
            let load = Fixed::frac(n, 10);
            let twice = load * 2;
            let coeff = twice / (twice + 1);
            assert!(coeff < Fixed::from_int(1), "coefficient not <1 for load {n}/10");
            assert!(coeff >= Fixed::ZERO);
        }
    }
}
