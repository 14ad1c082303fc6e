use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RtpError {
    #[error("invalid rtp percentage: {0}")]
    Invalid(String),
    #[error("rtp percentage must not be negative")]
    Negative,
    #[error("rtp percentage {got} outside admin range [{min}, {max}]")]
    OutOfRange { got: Rtp, min: Rtp, max: Rtp },
}

/// Return-to-player percentage in hundredths of a percent (`95.0` is `9500`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rtp(u32);

impl Rtp {
    /// Used when no setting has been stored.
    pub const DEFAULT: Rtp = Rtp(9_500);
    /// Payout table calibration point; multipliers scale by `rtp / BASELINE`.
    pub const BASELINE: Rtp = Rtp(9_500);
    pub const ADMIN_MIN: Rtp = Rtp(5_000);
    pub const ADMIN_MAX: Rtp = Rtp(9_900);

    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    pub const fn hundredths(self) -> u32 {
        self.0
    }

    pub fn from_decimal(value: Decimal) -> Result<Self, RtpError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(RtpError::Negative);
        }
        let hundredths = value
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .checked_mul(Decimal::from(100))
            .and_then(|hundredths| hundredths.to_u32())
            .ok_or_else(|| RtpError::Invalid(value.to_string()))?;
        Ok(Self(hundredths))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(i64::from(self.0), 2)
    }

    pub fn percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Range enforced by the admin surface. The prize engine applies any value it is given.
    pub fn validate_admin_range(self) -> Result<Self, RtpError> {
        if self < Self::ADMIN_MIN || self > Self::ADMIN_MAX {
            return Err(RtpError::OutOfRange {
                got: self,
                min: Self::ADMIN_MIN,
                max: Self::ADMIN_MAX,
            });
        }
        Ok(self)
    }
}

impl Default for Rtp {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Rtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal().normalize())
    }
}

impl FromStr for Rtp {
    type Err = RtpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let decimal =
            Decimal::from_str(trimmed).map_err(|_| RtpError::Invalid(trimmed.to_string()))?;
        Self::from_decimal(decimal)
    }
}

impl Serialize for Rtp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.percent())
    }
}

impl<'de> Deserialize<'de> for Rtp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let decimal = crate::serde_decimal::deserialize(deserializer)?;
        Rtp::from_decimal(decimal).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_setting_strings() {
        assert_eq!("95".parse::<Rtp>().unwrap(), Rtp::DEFAULT);
        assert_eq!("96.5".parse::<Rtp>().unwrap(), Rtp::from_hundredths(9_650));
        assert_eq!("-1".parse::<Rtp>(), Err(RtpError::Negative));
        assert!("abc".parse::<Rtp>().is_err());
    }

    #[test]
    fn displays_normalized() {
        assert_eq!(Rtp::DEFAULT.to_string(), "95");
        assert_eq!(Rtp::from_hundredths(9_650).to_string(), "96.5");
    }

    #[test]
    fn admin_range_is_inclusive() {
        assert!(Rtp::from_hundredths(5_000).validate_admin_range().is_ok());
        assert!(Rtp::from_hundredths(9_900).validate_admin_range().is_ok());
        assert!(Rtp::from_hundredths(4_999).validate_admin_range().is_err());
        assert!(Rtp::from_hundredths(9_901).validate_admin_range().is_err());
    }

    #[test]
    fn json_round_trips_as_number() {
        let rtp: Rtp = serde_json::from_str("97.25").unwrap();
        assert_eq!(rtp, Rtp::from_hundredths(9_725));
        assert_eq!(serde_json::to_string(&rtp).unwrap(), "97.25");
    }
}
