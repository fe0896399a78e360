//! Precision-safe decimal types for accounting.
//!
//! Uses `rust_decimal` for exact decimal arithmetic so balances and cost
//! basis never accumulate binary floating-point residue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::error::CoreError;

/// Per-unit price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

/// Signed position or fill quantity.
///
/// Positive = net long, negative = net short, zero = flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(pub Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Notional value of `|qty| * price`, `None` on overflow.
    #[inline]
    pub fn notional(&self, price: Price) -> Option<Amount> {
        self.0.abs().checked_mul(price.0).map(Amount)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Qty {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

/// Account money amount (balance currency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Amount {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<Decimal> for Amount {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional_uses_absolute_qty() {
        let short = Qty::new(dec!(-0.5));
        let price = Price::new(dec!(50000));

        assert_eq!(short.notional(price), Some(Amount::new(dec!(25000))));
    }

    #[test]
    fn test_notional_overflow_is_none() {
        let qty = Qty::new(dec!(100000000000000000000));
        let price = Price::new(dec!(1000000000));

        assert_eq!(qty.notional(price), None);
    }

    #[test]
    fn test_amount_checked_ops() {
        let max = Amount::new(Decimal::MAX);
        assert_eq!(max.checked_add(Amount::new(dec!(1))), None);
        assert_eq!(
            Amount::new(dec!(5)).checked_sub(Amount::new(dec!(7))),
            Some(Amount::new(dec!(-2)))
        );
    }

    #[test]
    fn test_qty_sign_helpers() {
        assert!(Qty::new(dec!(1)).is_long());
        assert!(Qty::new(dec!(-1)).is_short());
        assert!(!Qty::ZERO.is_long());
        assert!(!Qty::ZERO.is_short());
        assert_eq!(-Qty::new(dec!(2)), Qty::new(dec!(-2)));
    }

    #[test]
    fn test_amount_assign_ops() {
        let mut a = Amount::new(dec!(100));
        a -= Amount::new(dec!(30.5));
        a += Amount::new(dec!(0.5));
        assert_eq!(a, Amount::new(dec!(70)));

        a -= Amount::new(dec!(80));
        assert!(a.is_negative());
    }

    #[test]
    fn test_parse_from_str() {
        let p: Price = "123.45".parse().unwrap();
        assert_eq!(p.inner(), dec!(123.45));
        assert!(matches!(
            "abc".parse::<Amount>(),
            Err(CoreError::DecimalParse(_))
        ));
    }
}
