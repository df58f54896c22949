//! # Money Module
//!
//! Provides the `Money` type for handling cash amounts exactly.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │    |counted - expected| < 0.01   ← tolerance comparison on floats       │
//! │                                    silently flips at the boundary       │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Minor Units                                      │
//! │    14550 - 14500 = 50 minor units, exactly, every time                  │
//! │    |50| < 100 is an integer comparison with no rounding involved        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//!
//! let float = Money::from_minor(10_000);         // 100.00 opening float
//! let sale = Money::from_minor(5_000);
//! let expense = Money::from_minor(500);
//!
//! assert_eq!((float + sale - expense).minor(), 14_500);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

/// Minor units per major unit (cents per dollar).
pub const MINOR_PER_MAJOR: i64 = 100;

/// Largest magnitude accepted for a single amount or a session's running
/// cash balance: 10^13 major units.
///
/// Keeping both under this ceiling leaves `counted − expected` and the
/// auto-correction far inside i64.
pub const MAX_AMOUNT_MINOR: i64 = 1_000_000_000_000_000;

// =============================================================================
// Money Type
// =============================================================================

/// A signed monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: expenses, withdrawals and shortfalls are negative
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **No float constructor**: amounts enter via [`Money::from_minor`] or
///   [`crate::validation::parse_amount`]
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  opening float ──► Movement.amount_minor ──► Σ ──► expected             │
/// │                                                      │                  │
/// │  physical count ──────────────────────────► counted ─┴─► discrepancy    │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let counted = Money::from_minor(14_550);
    /// assert_eq!(counted.minor(), 14_550);
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion (truncated toward zero).
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / MINOR_PER_MAJOR
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % MINOR_PER_MAJOR).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value, saturating for `i64::MIN`.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.saturating_abs())
    }

    /// True when |self| ≤ [`MAX_AMOUNT_MINOR`].
    #[inline]
    pub const fn is_within_limit(&self) -> bool {
        self.0.unsigned_abs() <= MAX_AMOUNT_MINOR as u64
    }

    /// Checked addition, `None` on overflow.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked subtraction, `None` on overflow.
    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    #[inline]
    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    #[inline]
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Expresses `self` as basis points of `base` (10000 = 100%).
    ///
    /// Rounds half away from zero. Returns `None` when `base` is zero,
    /// since a percentage of nothing has no meaning, or when the ratio does
    /// not fit in i64.
    ///
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let discrepancy = Money::from_minor(-2_500);
    /// let expected = Money::from_minor(14_500);
    /// assert_eq!(discrepancy.ratio_bps(expected), Some(-1_724));
    /// assert_eq!(discrepancy.ratio_bps(Money::zero()), None);
    /// ```
    pub fn ratio_bps(&self, base: Money) -> Option<i64> {
        if base.is_zero() {
            return None;
        }

        // i128 so that large ledgers cannot overflow the intermediate product
        let num = self.0 as i128 * 10_000;
        let den = (base.0 as i128).abs();
        let half = den / 2;
        let bps = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        i64::try_from(bps).ok()
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`145.00`, `-25.00`) for logs and alert payloads.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_minor() {
        let money = Money::from_minor(1099);
        assert_eq!(money.minor(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor_part(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_minor(14_500).to_string(), "145.00");
        assert_eq!(Money::from_minor(-2_500).to_string(), "-25.00");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_minor(10_000);
        let b = Money::from_minor(500);

        assert_eq!((a + b).minor(), 10_500);
        assert_eq!((a - b).minor(), 9_500);
        assert_eq!((-b).minor(), -500);

        let total: Money = [a, b, -b].iter().sum();
        assert_eq!(total, a);
    }

    #[test]
    fn test_checked_and_saturating_overflow() {
        let max = Money::from_minor(i64::MAX);
        let min = Money::from_minor(i64::MIN);
        assert!(max.checked_add(Money::from_minor(1)).is_none());
        assert!(max.checked_sub(Money::from_minor(-1)).is_none());
        assert_eq!(max.saturating_sub(min), max);
        assert_eq!(min.saturating_add(min), min);
    }

    #[test]
    fn test_limit() {
        assert!(Money::from_minor(MAX_AMOUNT_MINOR).is_within_limit());
        assert!(Money::from_minor(-MAX_AMOUNT_MINOR).is_within_limit());
        assert!(!Money::from_minor(MAX_AMOUNT_MINOR + 1).is_within_limit());
        assert!(!Money::from_minor(i64::MIN).is_within_limit());
    }

    #[test]
    fn test_ratio_bps() {
        let expected = Money::from_minor(14_500);
        assert_eq!(Money::from_minor(50).ratio_bps(expected), Some(34));
        assert_eq!(Money::from_minor(14_500).ratio_bps(expected), Some(10_000));
        assert_eq!(Money::from_minor(1).ratio_bps(Money::zero()), None);
        // Would truncate if narrowed with a cast
        assert_eq!(Money::from_minor(i64::MAX).ratio_bps(Money::from_minor(1)), None);
    }
}
