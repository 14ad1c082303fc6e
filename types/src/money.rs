//! Fixed-point monetary amounts.
//!
//! Every balance, bet and prize is held as an `i64` count of cents. Conversions from
//! decimal text or JSON numbers round half-up (midpoint away from zero) to 2 fractional
//! digits, so `0.499` becomes `0.50` and `1.005` (as text) becomes `1.01`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Number of fractional digits carried by [`Money`].
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid monetary amount: {0}")]
    Invalid(String),
    #[error("monetary amount out of range")]
    Overflow,
}

/// A monetary amount in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Round `value` half-up to cents.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        let rounded =
            value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        let cents = rounded
            .checked_mul(Decimal::from(100))
            .and_then(|cents| cents.to_i64())
            .ok_or(MoneyError::Overflow)?;
        Ok(Self(cents))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, MONEY_SCALE)
    }

    /// Lossy view used only for JSON output and statistics.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// `max(0, self - other)`.
    pub fn saturating_sub_floor_zero(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let decimal =
            Decimal::from_str(trimmed).map_err(|_| MoneyError::Invalid(trimmed.to_string()))?;
        Self::from_decimal(decimal)
    }
}

impl TryFrom<f64> for Money {
    type Error = MoneyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(MoneyError::Invalid(value.to_string()));
        }
        let decimal = Decimal::from_f64_retain(value).ok_or(MoneyError::Overflow)?;
        Self::from_decimal(decimal)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let decimal = crate::serde_decimal::deserialize(deserializer)?;
        Money::from_decimal(decimal).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_decimal_text() {
        assert_eq!("10".parse::<Money>().unwrap(), Money::from_cents(1_000));
        assert_eq!("10.5".parse::<Money>().unwrap(), Money::from_cents(1_050));
        assert_eq!(" 0.50 ".parse::<Money>().unwrap(), Money::from_cents(50));
        assert!("ten".parse::<Money>().is_err());
    }

    #[test]
    fn rounds_half_up_to_cents() {
        assert_eq!("1.005".parse::<Money>().unwrap(), Money::from_cents(101));
        assert_eq!("1.004".parse::<Money>().unwrap(), Money::from_cents(100));
        assert_eq!("0.499".parse::<Money>().unwrap(), Money::from_cents(50));
        assert_eq!(Money::try_from(0.499).unwrap(), Money::from_cents(50));
    }

    #[test]
    fn rejects_non_finite_floats() {
        assert!(Money::try_from(f64::NAN).is_err());
        assert!(Money::try_from(f64::INFINITY).is_err());
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_cents(49_000).to_string(), "490.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn floor_zero_subtraction() {
        let rollover = Money::from_cents(500);
        assert_eq!(
            rollover.saturating_sub_floor_zero(Money::from_cents(1_000)),
            Money::ZERO
        );
        assert_eq!(
            rollover.saturating_sub_floor_zero(Money::from_cents(200)),
            Money::from_cents(300)
        );
    }

    #[test]
    fn json_accepts_numbers_and_strings() {
        let from_number: Money = serde_json::from_str("10.5").unwrap();
        let from_string: Money = serde_json::from_str("\"10.50\"").unwrap();
        let from_int: Money = serde_json::from_str("3").unwrap();
        assert_eq!(from_number, Money::from_cents(1_050));
        assert_eq!(from_string, Money::from_cents(1_050));
        assert_eq!(from_int, Money::from_cents(300));
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "10.5");
        assert!(serde_json::from_str::<Money>("true").is_err());
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(cents in -1_000_000_000i64..1_000_000_000) {
            let money = Money::from_cents(cents);
            prop_assert_eq!(money.to_string().parse::<Money>().unwrap(), money);
        }

        #[test]
        fn prop_floor_zero_never_negative(a in 0i64..1_000_000, b in 0i64..1_000_000) {
            let result = Money::from_cents(a).saturating_sub_floor_zero(Money::from_cents(b));
            prop_assert!(!result.is_negative());
            prop_assert!(result <= Money::from_cents(a));
        }
    }
}
