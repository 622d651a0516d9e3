//! Balance and voting-weight amounts.
//!
//! Amounts are fixed-point integers (u128) to avoid floating-point errors.
//! The smallest unit is 1 raw.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Raw units in one `nano` (10^30 raw).
pub const NANO_RAW: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// An account balance or a representative's voting weight, in raw units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u128::MAX);

    pub const fn raw(raw: u128) -> Self {
        Self(raw)
    }

    /// `value` whole nano, saturating at `Amount::MAX`.
    pub const fn nano(value: u128) -> Self {
        Self(value.saturating_mul(NANO_RAW))
    }

    pub fn number(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `self * numerator / denominator` without overflowing for large amounts.
    pub fn scaled(self, numerator: u128, denominator: u128) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        match self.0.checked_mul(numerator) {
            Some(product) => Self(product / denominator),
            None => Self((self.0 / denominator).saturating_mul(numerator)),
        }
    }

    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc.saturating_add(x))
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc.saturating_add(*x))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} raw", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nano_saturates() {
        assert_eq!(Amount::nano(1).number(), NANO_RAW);
        assert_eq!(Amount::nano(u128::MAX), Amount::MAX);
    }

    #[test]
    fn scaled_handles_overflow() {
        let quorum = Amount::MAX.scaled(67, 100);
        assert!(quorum < Amount::MAX);
        assert!(quorum > Amount::MAX.scaled(66, 100));
        assert_eq!(Amount::raw(1000).scaled(67, 100), Amount::raw(670));
    }

    #[test]
    fn sum_saturates() {
        let total: Amount = [Amount::MAX, Amount::raw(1)].iter().sum();
        assert_eq!(total, Amount::MAX);
    }

    #[test]
    fn be_bytes_round_trip() {
        let amount = Amount::raw(0x0102_0304);
        assert_eq!(Amount::from_be_bytes(amount.to_be_bytes()), amount);
    }
}
