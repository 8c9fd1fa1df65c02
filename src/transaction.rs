//! Transaction Records
//!
//! A transaction is the immutable audit record of an attempted or completed
//! balance-affecting event. Status is the only mutable field and it
//! transitions exactly once: `Pending` -> `Completed` | `Failed`. Completed
//! and failed records, and their ledger entries, are never edited —
//! corrections happen through new adjustment transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::account::{AccountId, PrincipalId};
use crate::currency::Currency;

/// Unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-form channel-specific detail (external references etc.).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Balance-affecting event kinds.
///
/// Closed set: the posting derivation table in [`crate::ledger`] is the
/// single source of truth for what each variant does to the books, and a
/// new variant must extend that table explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Fee,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::Fee => "fee",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Intent recorded, settlement not yet realized. The only mutable state.
    Pending,
    /// Terminal: applied with matching ledger entries.
    Completed,
    /// Terminal: no balance or ledger effect.
    Failed,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel tag for reporting. Informational only — never consulted by the
/// posting derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    BankToAccount,
    AccountToBank,
    AccountToMobileMoney,
    MobileMoneyToAccount,
    WalletToWallet,
    FiatToCrypto,
    CryptoToFiat,
    CryptoSwap,
}

/// Immutable transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Source account.
    pub account: AccountId,
    /// Same account for self-adjustments, `None` for pure withdrawals.
    pub destination_account: Option<AccountId>,
    pub transaction_type: TransactionType,
    pub direction: Option<Direction>,
    pub amount: Decimal,
    pub currency: Currency,
    pub fee: Decimal,
    pub status: TransactionStatus,
    /// `None` when the system performed the operation.
    pub performed_by: Option<PrincipalId>,
    pub description: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: AccountId,
        destination_account: Option<AccountId>,
        transaction_type: TransactionType,
        direction: Option<Direction>,
        amount: Decimal,
        currency: Currency,
        status: TransactionStatus,
        performed_by: Option<PrincipalId>,
        description: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            account,
            destination_account,
            transaction_type,
            direction,
            amount,
            currency,
            fee: Decimal::ZERO,
            status,
            performed_by,
            description: description.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Metadata key linking a withdrawal to its internal-fee transaction.
    pub const META_FEE_TX: &'static str = "fee_tx";
    /// Metadata key carrying the provider-charged fee on a withdrawal.
    pub const META_EXTERNAL_FEE: &'static str = "external_fee";
    /// Metadata key for provider payload recorded at initiation/confirmation.
    pub const META_EXTERNAL_DETAILS: &'static str = "external_party_details";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_type_serde_tags() {
        let t = serde_json::to_string(&TransactionType::Withdrawal).unwrap();
        assert_eq!(t, "\"withdrawal\"");
        let d = serde_json::to_string(&Direction::MobileMoneyToAccount).unwrap();
        assert_eq!(d, "\"mobile_money_to_account\"");
    }
}
