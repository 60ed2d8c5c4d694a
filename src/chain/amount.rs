//! Integer amounts in a chain's smallest unit (nAVAX).
//!
//! Amounts are never floating point. Every arithmetic operation is checked
//! and returns `None` on overflow or underflow, so callers decide which
//! error to raise.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of wei in one nAVAX on the EVM chain.
const WEI_PER_NANO: u64 = 1_000_000_000;

/// Arbitrary-precision unsigned amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub fn from_u256(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Multiply by a plain integer factor (e.g. a byte count).
    pub fn checked_mul_u64(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(U256::from(factor)).map(Amount)
    }

    /// Scale by `percent / 100`, rounding up.
    pub fn mul_percent_ceil(self, percent: u32) -> Option<Amount> {
        let scaled = self.0.checked_mul(U256::from(percent))?;
        let hundred = U256::from(100u64);
        let (quotient, remainder) = scaled.div_rem(hundred);
        let rounded = if remainder.is_zero() {
            quotient
        } else {
            quotient.checked_add(U256::from(1u64))?
        };
        Some(Amount(rounded))
    }

    /// Convert an EVM wei value to nAVAX, rounding up so a fee derived
    /// from it never undershoots.
    pub fn from_wei_ceil(wei: U256) -> Self {
        let (quotient, remainder) = wei.div_rem(U256::from(WEI_PER_NANO));
        if remainder.is_zero() {
            Amount(quotient)
        } else {
            Amount(quotient.saturating_add(U256::from(1u64)))
        }
    }

    /// Convert an EVM wei value to nAVAX, rounding down (balances).
    pub fn from_wei_floor(wei: U256) -> Self {
        Amount(wei / U256::from(WEI_PER_NANO))
    }

    /// Narrow to `u64` for wire encodings that use 8-byte amounts.
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }

    /// Sum a sequence of amounts, `None` on overflow.
    pub fn checked_sum<'a, I>(amounts: I) -> Option<Amount>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(*amount))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<U256> for Amount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing an amount from a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}': expected a non-negative decimal integer")]
pub struct ParseAmountError(pub String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseAmountError(s.to_string()));
        }
        U256::from_str_radix(trimmed, 10)
            .map(Amount)
            .map_err(|_| ParseAmountError(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accept both "1000" and 1000 so hand-written JSON stays convenient.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(Amount::from(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::from(1_000);
        let b = Amount::from(300);
        assert_eq!(a.checked_add(b), Some(Amount::from(1_300)));
        assert_eq!(a.checked_sub(b), Some(Amount::from(700)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(b.checked_mul_u64(3), Some(Amount::from(900)));
        assert_eq!(Amount::from_u256(U256::MAX).checked_add(Amount::from(1)), None);
    }

    #[test]
    fn test_percent_rounds_up() {
        assert_eq!(Amount::from(25).mul_percent_ceil(100), Some(Amount::from(25)));
        assert_eq!(Amount::from(25).mul_percent_ceil(150), Some(Amount::from(38)));
        assert_eq!(Amount::from(10).mul_percent_ceil(120), Some(Amount::from(12)));
    }

    #[test]
    fn test_wei_conversion() {
        let wei = U256::from(25_000_000_001u64);
        assert_eq!(Amount::from_wei_ceil(wei), Amount::from(26));
        assert_eq!(Amount::from_wei_floor(wei), Amount::from(25));
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("1000300".parse::<Amount>().unwrap(), Amount::from(1_000_300));
        assert!("-5".parse::<Amount>().is_err());
        assert!("1.5".parse::<Amount>().is_err());

        let json = serde_json::to_string(&Amount::from(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let from_number: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, Amount::from(42));
    }

    #[test]
    fn test_checked_sum() {
        let amounts = [Amount::from(1), Amount::from(2), Amount::from(3)];
        assert_eq!(Amount::checked_sum(&amounts), Some(Amount::from(6)));
    }
}
