//! Monetary helpers: cent rounding, platform fees and minor-unit conversion.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places carried by ledger amounts.
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to whole cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a ledger amount to integer minor units (cents) for the payout provider.
///
/// Returns `None` if the amount does not fit in an `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (round_money(amount) * Decimal::ONE_HUNDRED).to_i64()
}

/// ISO currency code used for provider payouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a currency from its code. Codes are stored lowercase, the way
    /// payout providers expect them.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_lowercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self::new("usd")
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform fee rate, expressed as a percentage of the gross amount.
///
/// A rate of `10` takes 10.00 out of a 100.00 payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate(Decimal);

impl FeeRate {
    /// Create a fee rate from a percentage in `0..=100`.
    pub fn from_percent(percent: Decimal) -> Result<Self, InvalidFeeRate> {
        if percent.is_sign_negative() || percent > Decimal::ONE_HUNDRED {
            return Err(InvalidFeeRate(percent));
        }
        Ok(Self(percent))
    }

    /// No platform fee.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// The rate as a percentage.
    pub fn percent(&self) -> Decimal {
        self.0
    }

    /// Split a gross amount into fee and net. The fee is rounded to cents and
    /// the net is whatever remains, so `net + fee == gross` always holds.
    pub fn split(&self, gross: Decimal) -> FeeSplit {
        let fee = round_money(gross * self.0 / Decimal::ONE_HUNDRED);
        FeeSplit {
            gross,
            fee,
            net: gross - fee,
        }
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Gross amount broken down into platform fee and payee net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

/// Fee rate outside `0..=100` percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidFeeRate(pub Decimal);

impl fmt::Display for InvalidFeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fee rate {} is outside 0..=100 percent", self.0)
    }
}

impl std::error::Error for InvalidFeeRate {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_fee_passes_gross_through() {
        let split = FeeRate::zero().split(dec!(100));
        assert_eq!(split.fee, Decimal::ZERO);
        assert_eq!(split.net, dec!(100));
    }

    #[test]
    fn test_ten_percent_fee() {
        let rate = FeeRate::from_percent(dec!(10)).unwrap();
        let split = rate.split(dec!(100));
        assert_eq!(split.fee, dec!(10.00));
        assert_eq!(split.net, dec!(90.00));
    }

    #[test]
    fn test_fee_rounds_to_cents() {
        let rate = FeeRate::from_percent(dec!(2.5)).unwrap();
        let split = rate.split(dec!(0.99));
        // 0.02475 rounds to 0.02
        assert_eq!(split.fee, dec!(0.02));
        assert_eq!(split.net + split.fee, dec!(0.99));
    }

    #[test]
    fn test_fee_rate_bounds() {
        assert!(FeeRate::from_percent(dec!(-1)).is_err());
        assert!(FeeRate::from_percent(dec!(100.01)).is_err());
        assert!(FeeRate::from_percent(dec!(100)).is_ok());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(50.00)), Some(5000));
        assert_eq!(to_minor_units(dec!(12.345)), Some(1235));
    }

    #[test]
    fn test_currency_is_lowercased() {
        assert_eq!(Currency::new("USD"), Currency::usd());
        assert_eq!(Currency::usd().code(), "usd");
    }
}
