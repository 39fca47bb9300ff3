//! `Amount`: a decimal-string-backed monetary value. All arithmetic goes
//! through `rust_decimal` so nothing is ever represented as binary
//! floating point (Design Note, spec.md Section 3).

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Maximum fractional digits the compliance engine's `amount_valid` check
/// will accept (spec.md 4.3.4).
pub const MAX_FRACTIONAL_DIGITS: u32 = 18;

impl Amount {
    pub fn parse(raw: &str) -> Result<Self, AmountParseError> {
        if raw.trim().is_empty() {
            return Err(AmountParseError::Empty);
        }
        let d = Decimal::from_str(raw.trim()).map_err(|_| AmountParseError::NotADecimal)?;
        if d <= Decimal::ZERO {
            return Err(AmountParseError::NotPositive);
        }
        if d.scale() > MAX_FRACTIONAL_DIGITS {
            return Err(AmountParseError::TooManyFractionalDigits);
        }
        Ok(Amount(d))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn to_canonical_string(&self) -> String {
        self.0.normalize().to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_canonical_string()
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount string is empty")]
    Empty,
    #[error("amount does not parse as a decimal")]
    NotADecimal,
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount has more than {MAX_FRACTIONAL_DIGITS} fractional digits")]
    TooManyFractionalDigits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(Amount::parse(""), Err(AmountParseError::Empty));
    }

    #[test]
    fn rejects_zero_and_negative() {
        assert_eq!(Amount::parse("0"), Err(AmountParseError::NotPositive));
        assert_eq!(Amount::parse("-5"), Err(AmountParseError::NotPositive));
    }

    #[test]
    fn rejects_non_decimal() {
        assert_eq!(Amount::parse("abc"), Err(AmountParseError::NotADecimal));
    }

    #[test]
    fn rejects_too_many_fractional_digits() {
        let raw = format!("1.{}", "1".repeat(19));
        assert_eq!(
            Amount::parse(&raw),
            Err(AmountParseError::TooManyFractionalDigits)
        );
    }

    #[test]
    fn accepts_boundary_values() {
        assert!(Amount::parse("3000.00").is_ok());
        assert!(Amount::parse("10000.00").is_ok());
        assert!(Amount::parse("50000.00").is_ok());
    }

    #[test]
    fn canonical_string_normalizes_trailing_zeros() {
        let a = Amount::parse("100.00").unwrap();
        assert_eq!(a.to_canonical_string(), "100");
    }
}
