//! Monetary amounts in minor currency units (cents).

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Signed amount in the smallest currency unit.
///
/// All arithmetic is exact integer arithmetic; the only rounding step is
/// [`Money::scale_rounded`], which rounds half away from zero at the cent.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Multiply by an integer factor (e.g. a line quantity).
    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// `self * numerator / denominator`, rounded half away from zero.
    ///
    /// Returns `None` if `denominator <= 0` or the result does not fit.
    pub fn scale_rounded(self, numerator: i64, denominator: i64) -> Option<Money> {
        if denominator <= 0 {
            return None;
        }
        let n = i128::from(self.0) * i128::from(numerator);
        let d = i128::from(denominator);
        let q = n / d;
        let r = n % d;
        let rounded = if r.abs() * 2 >= d { q + n.signum() } else { q };
        i64::try_from(rounded).ok().map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Parses decimal strings such as `"116"`, `"116.5"`, `"-3.05"`.
impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid amount: {s:?}"));
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .ok_or_else(invalid)?;
        Ok(Money(if negative { -minor } else { minor }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_minor(46400).to_string(), "464.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("116".parse::<Money>().unwrap(), Money::from_minor(11600));
        assert_eq!("116.5".parse::<Money>().unwrap(), Money::from_minor(11650));
        assert_eq!("-3.05".parse::<Money>().unwrap(), Money::from_minor(-305));
        assert!("1.234".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!(".5".parse::<Money>().is_err());
    }

    #[test]
    fn scale_rounds_half_away_from_zero() {
        // 1.00 / 1.16 = 0.8620... -> 0.86
        assert_eq!(Money::from_minor(100).scale_rounded(100, 116), Some(Money::from_minor(86)));
        // 0.05 / 2 = 0.025 -> 0.03
        assert_eq!(Money::from_minor(5).scale_rounded(1, 2), Some(Money::from_minor(3)));
        assert_eq!(Money::from_minor(-5).scale_rounded(1, 2), Some(Money::from_minor(-3)));
        assert_eq!(Money::from_minor(5).scale_rounded(1, 0), None);
    }

    #[test]
    fn serializes_as_bare_minor_units() {
        assert_eq!(serde_json::to_string(&Money::from_minor(46400)).unwrap(), "46400");
        let parsed: Money = serde_json::from_str("-305").unwrap();
        assert_eq!(parsed, Money::from_minor(-305));
    }

    #[test]
    fn sums_iterators() {
        let total: Money = [Money::from_minor(20000), Money::from_minor(20000)].iter().sum();
        assert_eq!(total, Money::from_minor(40000));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn display_then_parse_is_identity(minor in -10_000_000_000i64..10_000_000_000i64) {
            let m = Money::from_minor(minor);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }

        #[test]
        fn scaling_error_is_at_most_half_a_cent(minor in 0i64..1_000_000_000, num in 1i64..1000, den in 1i64..1000) {
            let scaled = Money::from_minor(minor).scale_rounded(num, den).unwrap();
            let exact = i128::from(minor) * i128::from(num);
            let diff = (i128::from(scaled.minor()) * i128::from(den) - exact).abs();
            prop_assert!(diff * 2 <= i128::from(den));
        }
    }
}
