//! Withdrawal Fee Policy
//!
//! The provider-charged (external) fee is a policy parameter, not a
//! constant: the rate schedule belongs to product configuration and is
//! loaded with the rest of [`crate::config::EngineConfig`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::Currency;

/// Default external fee rate: 1% of the principal.
pub const DEFAULT_EXTERNAL_FEE_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Fee policy for externally-settled withdrawals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Fraction of the principal charged by the payout provider
    /// (0.01 = 1%).
    pub external_fee_rate: Decimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            external_fee_rate: DEFAULT_EXTERNAL_FEE_RATE,
        }
    }
}

impl FeePolicy {
    /// Provider fee for withdrawing `amount`, quantized to the currency.
    pub fn external_fee(&self, currency: Currency, amount: Decimal) -> Decimal {
        currency.quantize(amount * self.external_fee_rate)
    }
}
