//! Account Model
//!
//! An account owns a balance in exactly one currency, plus the transfer
//! limits and flags that gate mutations. Balances are mutated only through
//! the locked unit-of-work primitives in [`crate::store`]; this module holds
//! the record itself and the pure validation logic.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult, LimitKind};

/// Unique account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque principal reference (account owner / operation performer).
///
/// The engine only cares about identity and activity; everything else
/// about users lives with the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Principal record as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub is_active: bool,
}

/// Account role in the books.
///
/// Exactly one `Asset`, `Revenue` and `Suspense` account exists per
/// currency, owned by the system principal; they are the mandatory ledger
/// counterparties for platform-originated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    /// Platform asset pool (external-world counterparty for deposits/withdrawals).
    Asset,
    /// Customer account.
    User,
    /// Platform fee income.
    Revenue,
    /// Platform expenses.
    Expense,
    /// Manual-adjustment counterparty; drifts positive/negative by design.
    Suspense,
}

impl AccountRole {
    /// Suspense absorbs net manual adjustments and may go negative;
    /// every other role keeps the non-negative balance invariant.
    pub const fn allows_negative_balance(&self) -> bool {
        matches!(self, AccountRole::Suspense)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Asset => "asset",
            AccountRole::User => "user",
            AccountRole::Revenue => "revenue",
            AccountRole::Expense => "expense",
            AccountRole::Suspense => "suspense",
        }
    }

    pub const fn is_system(&self) -> bool {
        !matches!(self, AccountRole::User)
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generate a random 11-digit account number.
///
/// Collision handling is the caller's job (the store retries on conflict).
pub fn generate_account_number() -> String {
    let mut rng = rand::thread_rng();
    (0..11).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

/// Per-account transfer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
    pub per_transaction: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            per_transaction: Decimal::from(2000),
            daily: Decimal::from(5000),
            monthly: Decimal::from(50000),
        }
    }
}

/// Account record.
///
/// `balance` is stored quantized to the currency's precision at all times.
/// Accounts are never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub owner: PrincipalId,
    pub currency: Currency,
    pub balance: Decimal,
    pub role: AccountRole,
    pub limits: TransferLimits,
    pub transfer_allowed: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        owner: PrincipalId,
        currency: Currency,
        role: AccountRole,
        limits: TransferLimits,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            account_number: generate_account_number(),
            owner,
            currency,
            balance: Decimal::ZERO,
            role,
            limits,
            transfer_allowed: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quantize `value` to this account's currency precision.
    pub fn quantize(&self, value: Decimal) -> Decimal {
        self.currency.quantize(value)
    }

    /// Pure transfer predicate.
    ///
    /// `daily_total` / `monthly_total` are the cumulative completed
    /// transfer amounts for the current calendar day/month, supplied by the
    /// store's aggregation queries. Returns the specific rejection so the
    /// caller can surface limit breaches distinctly.
    pub fn can_transfer(
        &self,
        amount: Decimal,
        owner_active: bool,
        daily_total: Decimal,
        monthly_total: Decimal,
    ) -> LedgerResult<()> {
        let amount = self.quantize(amount);

        if !self.transfer_allowed {
            return Err(LedgerError::TransfersNotAllowed(
                "transfers disabled for account".into(),
            ));
        }
        if !self.is_active {
            return Err(LedgerError::TransfersNotAllowed("account inactive".into()));
        }
        if !owner_active {
            return Err(LedgerError::TransfersNotAllowed("owner inactive".into()));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if amount > self.balance {
            return Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            });
        }

        let per_txn = self.quantize(self.limits.per_transaction);
        if amount > per_txn {
            return Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::PerTransaction,
                max: per_txn,
                attempted: amount,
            });
        }
        if daily_total + amount > self.limits.daily {
            return Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::Daily,
                max: self.limits.daily,
                attempted: daily_total + amount,
            });
        }
        if monthly_total + amount > self.limits.monthly {
            return Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::Monthly,
                max: self.limits.monthly,
                attempted: monthly_total + amount,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn user_account(balance: Decimal) -> Account {
        let mut acc = Account::new(
            PrincipalId::new(),
            Currency::USD,
            AccountRole::User,
            TransferLimits::default(),
        );
        acc.balance = balance;
        acc
    }

    #[test]
    fn test_account_number_shape() {
        let n = generate_account_number();
        assert_eq!(n.len(), 11);
        assert!(n.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_can_transfer_happy_path() {
        let acc = user_account(dec!(500));
        assert!(acc
            .can_transfer(dec!(100), true, Decimal::ZERO, Decimal::ZERO)
            .is_ok());
    }

    #[test]
    fn test_can_transfer_rejects_flags() {
        let mut acc = user_account(dec!(500));
        acc.transfer_allowed = false;
        let err = acc
            .can_transfer(dec!(100), true, Decimal::ZERO, Decimal::ZERO)
            .unwrap_err();
        assert!(err.is_transfer_rejection());

        let mut acc = user_account(dec!(500));
        acc.is_active = false;
        assert!(acc
            .can_transfer(dec!(100), true, Decimal::ZERO, Decimal::ZERO)
            .is_err());

        // inactive owner
        let acc = user_account(dec!(500));
        assert!(acc
            .can_transfer(dec!(100), false, Decimal::ZERO, Decimal::ZERO)
            .is_err());
    }

    #[test]
    fn test_can_transfer_rejects_bad_amounts() {
        let acc = user_account(dec!(500));
        assert!(matches!(
            acc.can_transfer(dec!(0), true, Decimal::ZERO, Decimal::ZERO),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            acc.can_transfer(dec!(-5), true, Decimal::ZERO, Decimal::ZERO),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            acc.can_transfer(dec!(500.01), true, Decimal::ZERO, Decimal::ZERO),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_can_transfer_limits() {
        let mut acc = user_account(dec!(100000));
        acc.limits = TransferLimits {
            per_transaction: dec!(2000),
            daily: dec!(5000),
            monthly: dec!(50000),
        };

        // per-transaction
        assert!(matches!(
            acc.can_transfer(dec!(2000.01), true, Decimal::ZERO, Decimal::ZERO),
            Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::PerTransaction,
                ..
            })
        ));

        // daily: 4900 already transferred today, 100 fits exactly, 100.01 does not
        assert!(acc
            .can_transfer(dec!(100), true, dec!(4900), Decimal::ZERO)
            .is_ok());
        assert!(matches!(
            acc.can_transfer(dec!(100.01), true, dec!(4900), Decimal::ZERO),
            Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::Daily,
                ..
            })
        ));

        // monthly
        assert!(matches!(
            acc.can_transfer(dec!(1000), true, Decimal::ZERO, dec!(49500)),
            Err(LedgerError::TransferLimitExceeded {
                limit: LimitKind::Monthly,
                ..
            })
        ));
    }

    #[test]
    fn test_suspense_allows_negative() {
        assert!(AccountRole::Suspense.allows_negative_balance());
        assert!(!AccountRole::User.allows_negative_balance());
        assert!(!AccountRole::Asset.allows_negative_balance());
    }
}
