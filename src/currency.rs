//! Currency Definitions and Quantization
//!
//! The single source of truth for rounding. Every amount entering or leaving
//! the engine passes through [`Currency::quantize`] before storage or
//! comparison; precision is per-currency and rounding is always truncation
//! (round toward zero), never half-up — half-up would silently change
//! settlement amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported currencies.
///
/// Closed set: an unknown currency cannot be represented, so the
/// precision table below is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Ghana Cedi
    GHS,
    /// US Dollar
    USD,
    /// Bitcoin
    BTC,
    /// Ethereum
    ETH,
    /// Ripple
    XRP,
    /// Litecoin
    LTC,
}

impl Currency {
    /// Decimal places stored and settled for this currency.
    pub const fn decimal_places(&self) -> u32 {
        match self {
            Currency::GHS | Currency::USD => 2,
            Currency::BTC | Currency::ETH => 18,
            Currency::XRP => 6,
            Currency::LTC => 8,
        }
    }

    /// Truncate `value` to this currency's precision (round toward zero).
    pub fn quantize(&self, value: Decimal) -> Decimal {
        value.trunc_with_scale(self.decimal_places())
    }

    /// One minimal unit of this currency (e.g. 0.01 for USD).
    pub fn unit(&self) -> Decimal {
        Decimal::new(1, self.decimal_places())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::GHS => "GHS",
            Currency::USD => "USD",
            Currency::BTC => "BTC",
            Currency::ETH => "ETH",
            Currency::XRP => "XRP",
            Currency::LTC => "LTC",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GHS" => Ok(Currency::GHS),
            "USD" => Ok(Currency::USD),
            "BTC" => Ok(Currency::BTC),
            "ETH" => Ok(Currency::ETH),
            "XRP" => Ok(Currency::XRP),
            "LTC" => Ok(Currency::LTC),
            other => Err(format!("unknown currency: {}", other)),
        }
    }
}

/// Normalize string input to `Decimal`.
///
/// Collaborators hand amounts over as strings to avoid float precision
/// loss in JSON; this is the one place they get parsed.
pub fn to_decimal(value: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_truncates_toward_zero() {
        // 2 dp: truncation, not half-up
        assert_eq!(Currency::USD.quantize(dec!(1.999)), dec!(1.99));
        assert_eq!(Currency::USD.quantize(dec!(1.995)), dec!(1.99));
        assert_eq!(Currency::USD.quantize(dec!(1.991)), dec!(1.99));
        // negative values truncate toward zero as well
        assert_eq!(Currency::USD.quantize(dec!(-1.999)), dec!(-1.99));
    }

    #[test]
    fn test_quantize_per_currency_precision() {
        assert_eq!(Currency::LTC.quantize(dec!(0.123456789)), dec!(0.12345678));
        assert_eq!(Currency::XRP.quantize(dec!(0.12345678)), dec!(0.123456));
        // 18 dp currencies keep full Decimal precision up to 18 places
        assert_eq!(
            Currency::ETH.quantize(dec!(1.123456789012345678)),
            dec!(1.123456789012345678)
        );
    }

    #[test]
    fn test_quantize_is_idempotent() {
        for c in [
            Currency::GHS,
            Currency::USD,
            Currency::BTC,
            Currency::ETH,
            Currency::XRP,
            Currency::LTC,
        ] {
            let q = c.quantize(dec!(123.456789012345678901));
            assert_eq!(c.quantize(q), q, "quantize must be idempotent for {}", c);
        }
    }

    #[test]
    fn test_unit() {
        assert_eq!(Currency::USD.unit(), dec!(0.01));
        assert_eq!(Currency::XRP.unit(), dec!(0.000001));
    }

    #[test]
    fn test_to_decimal_parses_strings() {
        assert_eq!(to_decimal("100.50").unwrap(), dec!(100.50));
        assert_eq!(to_decimal(" 0.00000001 ").unwrap(), dec!(0.00000001));
        assert!(to_decimal("1,000").is_err());
        assert!(to_decimal("abc").is_err());
    }

    #[test]
    fn test_currency_roundtrip() {
        for c in [
            Currency::GHS,
            Currency::USD,
            Currency::BTC,
            Currency::ETH,
            Currency::XRP,
            Currency::LTC,
        ] {
            assert_eq!(c.as_str().parse::<Currency>().unwrap(), c);
        }
        assert!("DOGE".parse::<Currency>().is_err());
    }
}
