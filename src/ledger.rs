//! Ledger Recording
//!
//! Every committed transaction is backed by exactly two ledger entries whose
//! debit and credit amounts match. The derivation table in
//! [`derive_entries`] is the single source of truth for ledger semantics:
//! a new transaction type must extend the table explicitly, never infer
//! entries heuristically.
//!
//! Entries are append-only. Corrections are made via new adjustment
//! transactions, never edits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{AccountId, AccountRole};
use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TransactionType};

/// Debit or credit side of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySide {
    Debit,
    Credit,
}

/// Persisted ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction: crate::transaction::TransactionId,
    pub account: AccountId,
    pub side: EntrySide,
    /// Always non-negative.
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An entry derived but not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDraft {
    pub account: AccountId,
    pub side: EntrySide,
    pub amount: Decimal,
}

impl EntryDraft {
    fn debit(account: AccountId, amount: Decimal) -> Self {
        Self {
            account,
            side: EntrySide::Debit,
            amount,
        }
    }

    fn credit(account: AccountId, amount: Decimal) -> Self {
        Self {
            account,
            side: EntrySide::Credit,
            amount,
        }
    }
}

/// Resolves the well-known platform account for `(currency, role)`.
///
/// Resolution happens lazily per derivation; a missing account surfaces as
/// [`LedgerError::SystemAccount`], never a panic or a silent default.
pub trait SystemLookup {
    fn system_account(&self, currency: Currency, role: AccountRole) -> LedgerResult<AccountId>;
}

/// Derive the balanced entry pair policy-mandated for `tx`.
///
/// | Type                  | Debit           | Credit          | Amount                  |
/// |-----------------------|-----------------|-----------------|-------------------------|
/// | fee                   | source          | system revenue  | fee charged             |
/// | deposit               | system asset    | destination     | principal               |
/// | withdrawal            | source          | system asset    | principal + externalFee |
/// | transfer              | sender          | receiver        | principal               |
/// | adjustment (amt > 0)  | system suspense | destination     | abs(principal)          |
/// | adjustment (amt < 0)  | source          | system suspense | abs(principal)          |
/// | adjustment (amt == 0) | rejected with `InvalidTransactionType`           |
pub fn derive_entries(
    tx: &Transaction,
    lookup: &dyn SystemLookup,
) -> LedgerResult<[EntryDraft; 2]> {
    let q = |v: Decimal| tx.currency.quantize(v);
    let destination = tx.destination_account.unwrap_or(tx.account);

    let pair = match tx.transaction_type {
        TransactionType::Fee => {
            let revenue = lookup.system_account(tx.currency, AccountRole::Revenue)?;
            let amount = q(tx.amount);
            [
                EntryDraft::debit(tx.account, amount),
                EntryDraft::credit(revenue, amount),
            ]
        }
        TransactionType::Deposit => {
            let asset = lookup.system_account(tx.currency, AccountRole::Asset)?;
            let amount = q(tx.amount);
            [
                EntryDraft::debit(asset, amount),
                EntryDraft::credit(destination, amount),
            ]
        }
        TransactionType::Withdrawal => {
            let asset = lookup.system_account(tx.currency, AccountRole::Asset)?;
            let external_fee = tx
                .metadata
                .get(Transaction::META_EXTERNAL_FEE)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO);
            let amount = q(tx.amount + external_fee);
            [
                EntryDraft::debit(tx.account, amount),
                EntryDraft::credit(asset, amount),
            ]
        }
        TransactionType::Transfer => {
            let amount = q(tx.amount);
            [
                EntryDraft::debit(tx.account, amount),
                EntryDraft::credit(destination, amount),
            ]
        }
        TransactionType::Adjustment => {
            let suspense = lookup.system_account(tx.currency, AccountRole::Suspense)?;
            let amount = q(tx.amount.abs());
            if tx.amount > Decimal::ZERO {
                [
                    EntryDraft::debit(suspense, amount),
                    EntryDraft::credit(destination, amount),
                ]
            } else if tx.amount < Decimal::ZERO {
                [
                    EntryDraft::debit(tx.account, amount),
                    EntryDraft::credit(suspense, amount),
                ]
            } else {
                return Err(LedgerError::InvalidTransactionType(
                    "adjustment of zero".into(),
                ));
            }
        }
    };

    validate_balanced(&pair)?;
    Ok(pair)
}

/// Check that debits equal credits before anything is persisted.
///
/// Unreachable with a correct derivation table; guards against future
/// extensions of the table introducing an unbalanced pair.
pub fn validate_balanced(entries: &[EntryDraft]) -> LedgerResult<()> {
    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for e in entries {
        if e.amount < Decimal::ZERO {
            return Err(LedgerError::LedgerImbalance { debits, credits });
        }
        match e.side {
            EntrySide::Debit => debits += e.amount,
            EntrySide::Credit => credits += e.amount,
        }
    }
    if debits != credits {
        return Err(LedgerError::LedgerImbalance { debits, credits });
    }
    Ok(())
}
