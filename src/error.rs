//! Ledger Error Types
//!
//! One taxonomy for every failure the engine can surface. Validation errors
//! are raised before any state changes; errors inside an atomic unit of work
//! roll the whole unit back.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the engine.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger engine error taxonomy.
///
/// Error codes are stable identifiers for API-layer collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Balance errors ===
    #[error("insufficient funds: balance {balance} cannot cover {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },

    // === Transfer validation errors ===
    #[error("transfers not allowed: {0}")]
    TransfersNotAllowed(String),

    /// Distinguished limit-breach subtype of [`LedgerError::TransfersNotAllowed`].
    #[error("{limit} limit of {max} exceeded: attempted cumulative {attempted}")]
    TransferLimitExceeded {
        limit: LimitKind,
        max: Decimal,
        attempted: Decimal,
    },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("currency mismatch: {src} vs {destination}")]
    CurrencyMismatch {
        src: crate::currency::Currency,
        destination: crate::currency::Currency,
    },

    // === System account errors ===
    #[error("no {role} system account configured for {currency}")]
    SystemAccount {
        currency: crate::currency::Currency,
        role: crate::account::AccountRole,
    },

    // === Unit-of-work errors ===
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// Defensive invariant check; unreachable with a correct derivation table.
    #[error("ledger imbalance: debits {debits} != credits {credits}")]
    LedgerImbalance { debits: Decimal, credits: Decimal },

    #[error("no posting policy for transaction type {0}")]
    InvalidTransactionType(String),

    // === Confirmation errors ===
    #[error("transaction not found")]
    NotFound,

    #[error("transaction already processed (idempotency guard)")]
    AlreadyProcessed,

    #[error("confirmed amount {confirmed} is less than recorded amount {recorded}")]
    AmountMismatch {
        confirmed: Decimal,
        recorded: Decimal,
    },
}

/// Which transfer limit a [`LedgerError::TransferLimitExceeded`] breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    PerTransaction,
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LimitKind::PerTransaction => "per-transaction",
            LimitKind::Daily => "daily",
            LimitKind::Monthly => "monthly",
        };
        write!(f, "{}", s)
    }
}

impl LedgerError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::TransfersNotAllowed(_) => "TRANSFERS_NOT_ALLOWED",
            LedgerError::TransferLimitExceeded { .. } => "TRANSFER_LIMIT_EXCEEDED",
            LedgerError::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::SystemAccount { .. } => "SYSTEM_ACCOUNT_MISSING",
            LedgerError::Precondition(_) => "PRECONDITION_FAILED",
            LedgerError::LedgerImbalance { .. } => "LEDGER_IMBALANCE",
            LedgerError::InvalidTransactionType(_) => "INVALID_TRANSACTION_TYPE",
            LedgerError::NotFound => "NOT_FOUND",
            LedgerError::AlreadyProcessed => "ALREADY_PROCESSED",
            LedgerError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
        }
    }

    /// True for any transfer rejection, limit breaches and currency
    /// mismatches included.
    pub fn is_transfer_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::TransfersNotAllowed(_)
                | LedgerError::TransferLimitExceeded { .. }
                | LedgerError::CurrencyMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_breach_is_transfer_rejection() {
        let err = LedgerError::TransferLimitExceeded {
            limit: LimitKind::Daily,
            max: dec!(5000),
            attempted: dec!(5001),
        };
        assert!(err.is_transfer_rejection());
        assert_eq!(err.code(), "TRANSFER_LIMIT_EXCEEDED");

        let err = LedgerError::TransfersNotAllowed("account inactive".into());
        assert!(err.is_transfer_rejection());

        let err = LedgerError::NotFound;
        assert!(!err.is_transfer_rejection());
    }

    #[test]
    fn test_error_messages() {
        let err = LedgerError::TransferLimitExceeded {
            limit: LimitKind::Monthly,
            max: dec!(50000),
            attempted: dec!(50001),
        };
        assert_eq!(
            err.to_string(),
            "monthly limit of 50000 exceeded: attempted cumulative 50001"
        );
    }
}
