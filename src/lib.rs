//! VaultLedger - Custodial Multi-Currency Account Ledger Engine
//!
//! Double-entry bookkeeping over per-currency custodial accounts:
//! deposits with deferred provider settlement, withdrawals with platform
//! and provider fees, wallet-to-wallet transfers with tiered limits, and
//! manual adjustments against a suspense counterparty.
//!
//! # Modules
//!
//! - [`currency`] - Supported currencies and decimal quantization
//! - [`error`] - The engine error taxonomy
//! - [`account`] - Account records, roles, limits and transfer validation
//! - [`transaction`] - Immutable transaction records and statuses
//! - [`ledger`] - Balanced entry-pair derivation per transaction type
//! - [`store`] - Shared state, row locks and the atomic unit of work
//! - [`fee`] - Withdrawal fee policy
//! - [`engine`] - The funding operations facade
//! - [`config`] - YAML configuration loading
//! - [`logging`] - Tracing setup

pub mod account;
pub mod config;
pub mod currency;
pub mod engine;
pub mod error;
pub mod fee;
pub mod ledger;
pub mod logging;
pub mod store;
pub mod transaction;

// Convenient re-exports at crate root
pub use account::{Account, AccountId, AccountRole, Principal, PrincipalId, TransferLimits};
pub use config::{EngineConfig, LoggingConfig};
pub use currency::Currency;
pub use engine::{
    ConfirmationOutcome, DepositConfirmation, DepositRequest, LedgerEngine, LedgerEvent, Notifier,
    WithdrawRequest,
};
pub use error::{LedgerError, LedgerResult, LimitKind};
pub use fee::FeePolicy;
pub use ledger::{EntryDraft, EntrySide, LedgerEntry, SystemLookup};
pub use store::{Store, TransactionFilter, UnitOfWork};
pub use transaction::{
    Direction, Metadata, Transaction, TransactionId, TransactionStatus, TransactionType,
};
