use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op;

//--------------------------------------        Cents         ---------------------------------------------------------
/// An amount of money in the minor unit of its currency (cents for USD, yen for JPY).
///
/// All settlement arithmetic is done in `Cents`. There is deliberately no conversion to or from floating point.
#[derive(Debug, Clone, Copy, Default, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

op!(binary Cents, Add, add);
op!(binary Cents, Sub, sub);
op!(inplace Cents, AddAssign, add_assign);
op!(inplace Cents, SubAssign, sub_assign);
op!(unary Cents, Neg, neg);

impl Mul<i64> for Cents {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in cents: {0}")]
pub struct CentsConversionError(String);

impl From<i64> for Cents {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Cents {
    type Error = CentsConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(CentsConversionError(format!("Value {value} is too large to convert to Cents")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl TryFrom<&str> for Cents {
    type Error = CentsConversionError;

    /// Parses an integer amount of minor units, e.g. `"1250"`. Gateway metadata carries amounts as strings.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| CentsConversionError(format!("'{value}' is not an integer amount of cents. {e}")))
    }
}

impl Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Applies a rate expressed in basis points (1/100th of a percent), rounding half away from zero.
    pub fn basis_points(&self, bps: u32) -> Self {
        let scaled = i128::from(self.0) * i128::from(bps);
        let half = if scaled < 0 { -5_000 } else { 5_000 };
        #[allow(clippy::cast_possible_truncation)]
        Self(((scaled + half) / 10_000) as i64)
    }

    /// Applies a rate expressed in basis points, discarding any fractional cent.
    pub fn basis_points_floor(&self, bps: u32) -> Self {
        let scaled = i128::from(self.0) * i128::from(bps);
        #[allow(clippy::cast_possible_truncation)]
        Self((scaled / 10_000) as i64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Cents::from(5000).to_string(), "50.00");
        assert_eq!(Cents::from(7).to_string(), "0.07");
        assert_eq!(Cents::from(-1234).to_string(), "-12.34");
    }

    #[test]
    fn basis_point_rounding() {
        // 3% of 1.25 is 3.75 cents, which rounds to 4
        assert_eq!(Cents::from(125).basis_points(300), Cents::from(4));
        assert_eq!(Cents::from(125).basis_points_floor(300), Cents::from(3));
        assert_eq!(Cents::from(5000).basis_points(500), Cents::from(250));
        assert_eq!(Cents::from(-125).basis_points(300), Cents::from(-4));
    }

    #[test]
    fn parse_metadata_amounts() {
        assert_eq!(Cents::try_from(" 1250 ").unwrap(), Cents::from(1250));
        assert!(Cents::try_from("12.50").is_err());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let s = serde_json::to_string(&Cents::from(42)).unwrap();
        assert_eq!(s, "42");
        let c: Cents = serde_json::from_str("-9").unwrap();
        assert_eq!(c, Cents::from(-9));
    }
}
