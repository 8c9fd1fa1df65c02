//! Ledger Engine
//!
//! Orchestrates the funding operations over the store: deposits (immediate
//! and deferred-settlement), withdrawals with provider and platform fees,
//! wallet-to-wallet transfers, fee charges and manual adjustments. Every
//! committed operation produces a transaction record backed by a balanced
//! ledger entry pair; every rejected operation leaves balances untouched.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::account::{Account, AccountId, AccountRole, PrincipalId, TransferLimits};
use crate::config::EngineConfig;
use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult};
use crate::fee::FeePolicy;
use crate::ledger::SystemLookup;
use crate::store::{Store, TransactionFilter};
use crate::transaction::{
    Direction, Metadata, Transaction, TransactionId, TransactionStatus, TransactionType,
};

/// Event pushed to the notification collaborator after a commit.
#[derive(Debug, Clone, Copy)]
pub enum LedgerEvent<'a> {
    TransactionCompleted(&'a Transaction),
    TransactionFailed(&'a Transaction),
}

/// Outbound notification hook. Fire-and-forget: delivery failures are
/// logged, never propagated into the funding path.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &LedgerEvent<'_>) -> anyhow::Result<()>;
}

/// Deposit parameters.
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub account: AccountId,
    pub amount: Decimal,
    pub direction: Option<Direction>,
    pub performed_by: Option<PrincipalId>,
    pub description: String,
    pub metadata: Metadata,
    /// `true` settles immediately; `false` records a pending intent to be
    /// settled by a later [`LedgerEngine::confirm_deposit`].
    pub auto_complete: bool,
}

impl DepositRequest {
    pub fn new(account: AccountId, amount: Decimal) -> Self {
        Self {
            account,
            amount,
            direction: None,
            performed_by: None,
            description: String::new(),
            metadata: Metadata::new(),
            auto_complete: true,
        }
    }
}

/// Withdrawal parameters. `fee` is the platform's own charge; the
/// provider's external fee comes from the engine's [`FeePolicy`].
#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub account: AccountId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub direction: Option<Direction>,
    pub performed_by: Option<PrincipalId>,
    pub description: String,
    pub metadata: Metadata,
    pub auto_complete: bool,
}

impl WithdrawRequest {
    pub fn new(account: AccountId, amount: Decimal) -> Self {
        Self {
            account,
            amount,
            fee: Decimal::ZERO,
            direction: None,
            performed_by: None,
            description: String::new(),
            metadata: Metadata::new(),
            auto_complete: true,
        }
    }
}

/// Settlement outcome reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationOutcome {
    Completed,
    Failed,
}

/// Provider confirmation payload for a pending deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfirmation {
    pub transaction_id: TransactionId,
    pub status: ConfirmationOutcome,
    pub amount: Decimal,
    #[serde(default)]
    pub ext_transaction_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The funding operations facade.
pub struct LedgerEngine {
    store: Arc<Store>,
    fee_policy: FeePolicy,
    default_limits: TransferLimits,
    notifier: Option<Arc<dyn Notifier>>,
}

impl LedgerEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: Arc::new(Store::new()),
            fee_policy: config.fees,
            default_limits: config.default_limits,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee_policy
    }

    // ============================================================
    // Provisioning
    // ============================================================

    /// Create the asset, revenue and suspense accounts for `currency` if
    /// they do not exist yet. Idempotent.
    pub fn provision_currency(&self, currency: Currency) -> LedgerResult<()> {
        for role in [AccountRole::Asset, AccountRole::Revenue, AccountRole::Suspense] {
            if self.store.system_account(currency, role).is_err() {
                let account = self.store.open_system_account(currency, role)?;
                info!(%currency, %role, account = %account.id, "system account provisioned");
            }
        }
        Ok(())
    }

    pub fn register_principal(&self) -> PrincipalId {
        self.store.register_principal()
    }

    /// Open a user account with the engine's default transfer limits.
    pub fn open_account(&self, owner: PrincipalId, currency: Currency) -> LedgerResult<Account> {
        self.provision_currency(currency)?;
        let account = self.store.open_account(owner, currency, self.default_limits);
        info!(account = %account.id, number = %account.account_number, %currency, "account opened");
        Ok(account)
    }

    // ============================================================
    // Deposits
    // ============================================================

    /// Credit funds into an account.
    ///
    /// With `auto_complete` the deposit settles in one atomic unit. Without
    /// it only a `pending` intent is recorded; no balance moves until the
    /// provider confirms via [`Self::confirm_deposit`].
    pub fn deposit(&self, req: DepositRequest) -> LedgerResult<Transaction> {
        let account = self.store.account(req.account)?;
        let amount = account.quantize(req.amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        // Resolve the counterparty up front so a deferred deposit cannot
        // become unsettleable later.
        self.store.system_account(account.currency, AccountRole::Asset)?;

        let status = if req.auto_complete {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Pending
        };
        let tx = Transaction::new(
            account.id,
            Some(account.id),
            TransactionType::Deposit,
            req.direction,
            amount,
            account.currency,
            status,
            req.performed_by,
            req.description,
            req.metadata,
        );

        if req.auto_complete {
            let committed = tx.clone();
            self.store.atomically(&[account.id], |uow| {
                uow.add_balance(account.id, amount)?;
                uow.record(committed)
            })?;
            info!(tx = %tx.id, account = %account.id, %amount, "deposit completed");
            self.dispatch(LedgerEvent::TransactionCompleted(&tx));
            Ok(tx)
        } else {
            let tx = self.store.insert_transaction(tx);
            info!(tx = %tx.id, account = %account.id, %amount, "deposit pending confirmation");
            Ok(tx)
        }
    }

    /// Settle a pending deposit from a provider confirmation.
    ///
    /// Exactly once: concurrent confirmations for the same transaction
    /// serialize on the destination account's row lock, and only the first
    /// finds the record still pending. A confirmed amount below the
    /// recorded amount is rejected and the record stays pending for
    /// operator review; a larger amount settles in full.
    pub fn confirm_deposit(&self, confirmation: DepositConfirmation) -> LedgerResult<Transaction> {
        let recorded = self.store.transaction(confirmation.transaction_id)?;
        if recorded.transaction_type != TransactionType::Deposit {
            return Err(LedgerError::InvalidTransactionType(
                recorded.transaction_type.to_string(),
            ));
        }
        if recorded.status.is_terminal() {
            return Err(LedgerError::AlreadyProcessed);
        }
        let amount = recorded.currency.quantize(confirmation.amount);
        if confirmation.status == ConfirmationOutcome::Completed && amount < recorded.amount {
            return Err(LedgerError::AmountMismatch {
                confirmed: amount,
                recorded: recorded.amount,
            });
        }

        let result = self.store.atomically(&[recorded.account], |uow| {
            // Losers of the confirmation race see a terminal status here.
            if uow.transaction_status(recorded.id)?.is_terminal() {
                return Err(LedgerError::AlreadyProcessed);
            }
            let mut tx = recorded.clone();
            tx.metadata.extend(confirmation.metadata.clone());
            tx.metadata.insert(
                Transaction::META_EXTERNAL_DETAILS.into(),
                serde_json::json!({
                    "status": confirmation.status,
                    "amount": amount.to_string(),
                    "ext_transaction_id": confirmation.ext_transaction_id,
                }),
            );
            tx.updated_at = Utc::now();
            match confirmation.status {
                ConfirmationOutcome::Completed => {
                    tx.amount = amount;
                    tx.status = TransactionStatus::Completed;
                    uow.add_balance(tx.account, amount)?;
                }
                ConfirmationOutcome::Failed => {
                    tx.status = TransactionStatus::Failed;
                }
            }
            uow.record_transition(tx.clone())?;
            Ok(tx)
        })?;

        match result.status {
            TransactionStatus::Completed => {
                info!(tx = %result.id, account = %result.account, %amount, "deposit confirmed");
                self.dispatch(LedgerEvent::TransactionCompleted(&result));
            }
            _ => {
                info!(tx = %result.id, account = %result.account, "deposit marked failed");
                self.dispatch(LedgerEvent::TransactionFailed(&result));
            }
        }
        Ok(result)
    }

    // ============================================================
    // Withdrawals
    // ============================================================

    /// Withdraw funds to an external destination.
    ///
    /// The user account is debited the principal plus the provider's
    /// external fee; a positive platform `fee` is charged as a separate
    /// fee transaction committed in the same atomic unit and linked via
    /// the withdrawal's metadata.
    pub fn withdraw(&self, req: WithdrawRequest) -> LedgerResult<Transaction> {
        let account = self.store.account(req.account)?;
        let amount = account.quantize(req.amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let fee = account.quantize(req.fee);
        if fee < Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(fee));
        }
        let external_fee = self.fee_policy.external_fee(account.currency, amount);
        let total = amount + fee + external_fee;

        self.store.system_account(account.currency, AccountRole::Asset)?;
        let revenue = if fee > Decimal::ZERO {
            Some(self.store.system_account(account.currency, AccountRole::Revenue)?)
        } else {
            None
        };

        let mut metadata = req.metadata;
        metadata.insert(
            Transaction::META_EXTERNAL_FEE.into(),
            serde_json::Value::String(external_fee.to_string()),
        );
        let fee_tx_id = (fee > Decimal::ZERO).then(TransactionId::new);
        if let Some(id) = fee_tx_id {
            metadata.insert(
                Transaction::META_FEE_TX.into(),
                serde_json::Value::String(id.to_string()),
            );
        }

        let mut tx = Transaction::new(
            account.id,
            None,
            TransactionType::Withdrawal,
            req.direction,
            amount,
            account.currency,
            if req.auto_complete {
                TransactionStatus::Completed
            } else {
                TransactionStatus::Pending
            },
            req.performed_by,
            req.description.clone(),
            metadata,
        );
        tx.fee = fee;

        // Limit checks cover principal plus both fees.
        let owner_active = self.store.principal_active(account.owner);
        let now = Utc::now();
        if let Err(err) = account.can_transfer(
            total,
            owner_active,
            self.store.daily_transferred(account.id, now),
            self.store.monthly_transferred(account.id, now),
        ) {
            self.record_failure(&tx, &err);
            return Err(err);
        }

        if !req.auto_complete {
            let tx = self.store.insert_transaction(tx);
            info!(tx = %tx.id, account = %account.id, %amount, "withdrawal pending settlement");
            return Ok(tx);
        }

        let mut locks = vec![account.id];
        if let Some(rev) = revenue {
            locks.push(rev);
        }
        let committed = tx.clone();
        let performed_by = req.performed_by;
        let description = req.description;
        let result = self.store.atomically(&locks, |uow| {
            // Balance may have moved since the snapshot check.
            let row = uow.account(account.id)?;
            if row.balance < total {
                return Err(LedgerError::InsufficientFunds {
                    balance: row.balance,
                    required: total,
                });
            }
            uow.subtract_balance(account.id, amount + external_fee)?;
            uow.record(committed)?;
            if let (Some(fee_id), Some(rev)) = (fee_tx_id, revenue) {
                uow.subtract_balance(account.id, fee)?;
                uow.add_balance(rev, fee)?;
                let mut fee_tx = Transaction::new(
                    account.id,
                    None,
                    TransactionType::Fee,
                    None,
                    fee,
                    account.currency,
                    TransactionStatus::Completed,
                    performed_by,
                    format!("withdrawal fee: {description}"),
                    Metadata::new(),
                );
                fee_tx.id = fee_id;
                uow.record(fee_tx)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                info!(tx = %tx.id, account = %account.id, %amount, %fee, %external_fee, "withdrawal completed");
                self.dispatch(LedgerEvent::TransactionCompleted(&tx));
                Ok(tx)
            }
            Err(err) => {
                self.record_failure(&tx, &err);
                Err(err)
            }
        }
    }

    // ============================================================
    // Transfers
    // ============================================================

    /// Move funds between two accounts of the same currency.
    ///
    /// Both rows are locked for the whole unit; the limit and balance
    /// checks are re-made under the source lock, so two competing
    /// transfers can never jointly overdraw an account.
    pub fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        performed_by: Option<PrincipalId>,
        description: impl Into<String>,
    ) -> LedgerResult<Transaction> {
        let src = self.store.account(source)?;
        let dst = self.store.account(destination)?;
        let amount = src.quantize(amount);
        let description = description.into();

        let tx = Transaction::new(
            source,
            Some(destination),
            TransactionType::Transfer,
            Some(Direction::WalletToWallet),
            amount,
            src.currency,
            TransactionStatus::Completed,
            performed_by,
            description,
            Metadata::new(),
        );

        let validated: LedgerResult<()> = (|| {
            if source == destination {
                return Err(LedgerError::TransfersNotAllowed(
                    "source and destination are the same account".into(),
                ));
            }
            if src.currency != dst.currency {
                return Err(LedgerError::CurrencyMismatch {
                    src: src.currency,
                    destination: dst.currency,
                });
            }
            if !dst.is_active {
                return Err(LedgerError::TransfersNotAllowed(
                    "destination account inactive".into(),
                ));
            }
            Ok(())
        })();
        if let Err(err) = validated {
            self.record_failure(&tx, &err);
            return Err(err);
        }

        let owner_active = self.store.principal_active(src.owner);
        let committed = tx.clone();
        let result = self.store.atomically(&[source, destination], |uow| {
            let row = uow.account(source)?.clone();
            let now = Utc::now();
            row.can_transfer(
                amount,
                owner_active,
                self.store.daily_transferred(source, now),
                self.store.monthly_transferred(source, now),
            )?;
            uow.subtract_balance(source, amount)?;
            uow.add_balance(destination, amount)?;
            uow.record(committed)?;
            Ok(())
        });

        match result {
            Ok(()) => {
                info!(tx = %tx.id, %source, %destination, %amount, "transfer completed");
                self.dispatch(LedgerEvent::TransactionCompleted(&tx));
                Ok(tx)
            }
            Err(err) => {
                self.record_failure(&tx, &err);
                Err(err)
            }
        }
    }

    // ============================================================
    // Fees and adjustments
    // ============================================================

    /// Charge a platform fee: debits the account, credits the currency's
    /// revenue account.
    pub fn charge_fee(
        &self,
        account: AccountId,
        fee_amount: Decimal,
        performed_by: Option<PrincipalId>,
        description: impl Into<String>,
    ) -> LedgerResult<Transaction> {
        let acc = self.store.account(account)?;
        let fee_amount = acc.quantize(fee_amount);
        if fee_amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(fee_amount));
        }
        let revenue = self.store.system_account(acc.currency, AccountRole::Revenue)?;

        let tx = Transaction::new(
            account,
            None,
            TransactionType::Fee,
            None,
            fee_amount,
            acc.currency,
            TransactionStatus::Completed,
            performed_by,
            description,
            Metadata::new(),
        );
        let committed = tx.clone();
        self.store.atomically(&[account, revenue], |uow| {
            uow.subtract_balance(account, fee_amount)?;
            uow.add_balance(revenue, fee_amount)?;
            uow.record(committed)
        })?;
        info!(tx = %tx.id, %account, %fee_amount, "fee charged");
        Ok(tx)
    }

    /// Manual credit: funds the account from the currency's suspense
    /// account, which is allowed to drift negative.
    pub fn credit_account(
        &self,
        account: AccountId,
        amount: Decimal,
        performed_by: Option<PrincipalId>,
        description: impl Into<String>,
    ) -> LedgerResult<Transaction> {
        let acc = self.store.account(account)?;
        let amount = acc.quantize(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        self.adjust(acc, amount, performed_by, description.into())
    }

    /// Manual debit: moves funds from the account into suspense. Fails
    /// with `InsufficientFunds` if the account cannot cover it.
    pub fn debit_account(
        &self,
        account: AccountId,
        amount: Decimal,
        performed_by: Option<PrincipalId>,
        description: impl Into<String>,
    ) -> LedgerResult<Transaction> {
        let acc = self.store.account(account)?;
        let amount = acc.quantize(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        self.adjust(acc, -amount, performed_by, description.into())
    }

    fn adjust(
        &self,
        acc: Account,
        signed_amount: Decimal,
        performed_by: Option<PrincipalId>,
        description: String,
    ) -> LedgerResult<Transaction> {
        let suspense = self.store.system_account(acc.currency, AccountRole::Suspense)?;

        let tx = Transaction::new(
            acc.id,
            Some(acc.id),
            TransactionType::Adjustment,
            None,
            signed_amount,
            acc.currency,
            TransactionStatus::Completed,
            performed_by,
            description,
            Metadata::new(),
        );
        let committed = tx.clone();
        let magnitude = signed_amount.abs();
        let account = acc.id;
        self.store.atomically(&[account, suspense], |uow| {
            if signed_amount > Decimal::ZERO {
                uow.add_balance(account, magnitude)?;
                uow.subtract_balance(suspense, magnitude)?;
            } else {
                uow.subtract_balance(account, magnitude)?;
                uow.add_balance(suspense, magnitude)?;
            }
            uow.record(committed)
        })?;
        info!(tx = %tx.id, %account, amount = %signed_amount, "adjustment applied");
        self.dispatch(LedgerEvent::TransactionCompleted(&tx));
        Ok(tx)
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn account(&self, id: AccountId) -> LedgerResult<Account> {
        self.store.account(id)
    }

    pub fn system_account(&self, currency: Currency, role: AccountRole) -> LedgerResult<Account> {
        let id = self.store.system_account(currency, role)?;
        self.store.account(id)
    }

    pub fn transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.store.transaction(id)
    }

    /// Transactions originating from `account`, filtered.
    pub fn transactions(&self, account: AccountId, filter: &TransactionFilter) -> Vec<Transaction> {
        self.store.sent_transactions(account, filter)
    }

    /// Transactions received by `account` as destination, filtered.
    pub fn received_transactions(
        &self,
        account: AccountId,
        filter: &TransactionFilter,
    ) -> Vec<Transaction> {
        self.store.received_transactions(account, filter)
    }

    // ============================================================
    // Internals
    // ============================================================

    /// Best-effort failed-transaction audit record, written outside any
    /// unit of work so it survives the rollback it describes.
    fn record_failure(&self, attempted: &Transaction, err: &LedgerError) {
        let mut tx = attempted.clone();
        tx.status = TransactionStatus::Failed;
        tx.updated_at = Utc::now();
        if tx.description.is_empty() {
            tx.description = format!("failed: {err}");
        } else {
            tx.description = format!("{} (failed: {err})", tx.description);
        }
        tx.metadata.insert(
            "error".into(),
            serde_json::Value::String(err.code().to_string()),
        );
        warn!(tx = %tx.id, account = %tx.account, error = %err, "operation rejected");
        let recorded = self.store.insert_transaction(tx);
        self.dispatch(LedgerEvent::TransactionFailed(&recorded));
    }

    fn dispatch(&self, event: LedgerEvent<'_>) {
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.notify(&event) {
                warn!(error = %err, "notification delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitKind;
    use crate::store::entry_delta;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn engine() -> LedgerEngine {
        LedgerEngine::new(&EngineConfig::default())
    }

    fn funded_account(engine: &LedgerEngine, balance: Decimal) -> Account {
        let owner = engine.register_principal();
        let account = engine.open_account(owner, Currency::USD).unwrap();
        if balance > Decimal::ZERO {
            engine
                .deposit(DepositRequest::new(account.id, balance))
                .unwrap();
        }
        engine.account(account.id).unwrap()
    }

    #[test]
    fn test_open_account_provisions_system_accounts() {
        let engine = engine();
        funded_account(&engine, Decimal::ZERO);
        for role in [AccountRole::Asset, AccountRole::Revenue, AccountRole::Suspense] {
            let sys = engine.system_account(Currency::USD, role).unwrap();
            assert_eq!(sys.role, role);
            assert_eq!(sys.balance, Decimal::ZERO);
        }
    }

    #[test]
    fn test_deposit_rejects_non_positive() {
        let engine = engine();
        let account = funded_account(&engine, Decimal::ZERO);
        assert!(matches!(
            engine.deposit(DepositRequest::new(account.id, dec!(0))),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            engine.deposit(DepositRequest::new(account.id, dec!(-5))),
            Err(LedgerError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn test_deposit_amount_quantized() {
        let engine = engine();
        let account = funded_account(&engine, Decimal::ZERO);
        let tx = engine
            .deposit(DepositRequest::new(account.id, dec!(10.999)))
            .unwrap();
        assert_eq!(tx.amount, dec!(10.99));
        assert_eq!(engine.account(account.id).unwrap().balance, dec!(10.99));
    }

    #[test]
    fn test_withdraw_insufficient_for_total() {
        let engine = engine();
        // 100 covers the principal but not principal + external fee
        let account = funded_account(&engine, dec!(100));
        let err = engine
            .withdraw(WithdrawRequest::new(account.id, dec!(100)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(engine.account(account.id).unwrap().balance, dec!(100.00));
    }

    #[test]
    fn test_withdraw_links_fee_transaction() {
        let engine = engine();
        let account = funded_account(&engine, dec!(500));
        let mut req = WithdrawRequest::new(account.id, dec!(100));
        req.fee = dec!(1);
        let tx = engine.withdraw(req).unwrap();

        let fee_id = tx.metadata[Transaction::META_FEE_TX].as_str().unwrap();
        let fee_tx = engine
            .transaction(TransactionId(fee_id.parse().unwrap()))
            .unwrap();
        assert_eq!(fee_tx.transaction_type, TransactionType::Fee);
        assert_eq!(fee_tx.amount, dec!(1.00));
        assert_eq!(fee_tx.status, TransactionStatus::Completed);

        // 500 - 100 principal - 1 external fee - 1 platform fee
        assert_eq!(engine.account(account.id).unwrap().balance, dec!(398.00));
        let revenue = engine
            .system_account(Currency::USD, AccountRole::Revenue)
            .unwrap();
        assert_eq!(revenue.balance, dec!(1.00));
    }

    #[test]
    fn test_withdraw_limit_boundary_includes_fees() {
        let mut config = EngineConfig::default();
        config.default_limits.per_transaction = dec!(10000);

        let engine = LedgerEngine::new(&config);
        let account = funded_account(&engine, dec!(10000));
        // daily limit is 5000; principal plus 1% external fee must fit.
        // 4950.49 + 49.50 = 4999.99 fits
        let tx = engine
            .withdraw(WithdrawRequest::new(account.id, dec!(4950.49)))
            .unwrap();
        assert_eq!(
            tx.metadata[Transaction::META_EXTERNAL_FEE].as_str().unwrap(),
            "49.50"
        );

        let engine = LedgerEngine::new(&config);
        let account = funded_account(&engine, dec!(10000));
        // 4950.51 + 49.50 = 5000.01 breaches the daily limit
        let err = engine
            .withdraw(WithdrawRequest::new(account.id, dec!(4950.51)))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TransferLimitExceeded {
                limit: LimitKind::Daily,
                ..
            }
        ));
    }

    #[test]
    fn test_withdraw_rejection_leaves_failed_audit_record() {
        let engine = engine();
        let account = funded_account(&engine, dec!(10));
        engine
            .withdraw(WithdrawRequest::new(account.id, dec!(100)))
            .unwrap_err();
        let failed = engine.transactions(
            account.id,
            &TransactionFilter {
                status: Some(TransactionStatus::Failed),
                ..Default::default()
            },
        );
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].transaction_type, TransactionType::Withdrawal);
        // no ledger entries for the failed record
        assert!(engine.store().entries_for_transaction(failed[0].id).is_empty());
    }

    #[test]
    fn test_transfer_currency_mismatch() {
        let engine = engine();
        let usd = funded_account(&engine, dec!(100));
        let owner = engine.register_principal();
        let btc = engine.open_account(owner, Currency::BTC).unwrap();
        let err = engine
            .transfer(usd.id, btc.id, dec!(10), None, "cross-currency")
            .unwrap_err();
        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));
        assert!(err.is_transfer_rejection());
    }

    #[test]
    fn test_transfer_to_inactive_destination() {
        let engine = engine();
        let src = funded_account(&engine, dec!(100));
        let dst = funded_account(&engine, Decimal::ZERO);
        engine.store().set_account_active(dst.id, false).unwrap();
        let err = engine
            .transfer(src.id, dst.id, dec!(10), None, "to inactive")
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransfersNotAllowed(_)));
    }

    #[test]
    fn test_transfer_to_self_rejected() {
        let engine = engine();
        let src = funded_account(&engine, dec!(100));
        let err = engine
            .transfer(src.id, src.id, dec!(10), None, "self")
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransfersNotAllowed(_)));
    }

    #[test]
    fn test_charge_fee_moves_user_and_revenue() {
        let engine = engine();
        let account = funded_account(&engine, dec!(100));
        let tx = engine
            .charge_fee(account.id, dec!(2.50), None, "service fee")
            .unwrap();
        assert_eq!(engine.account(account.id).unwrap().balance, dec!(97.50));
        let revenue = engine
            .system_account(Currency::USD, AccountRole::Revenue)
            .unwrap();
        assert_eq!(revenue.balance, dec!(2.50));
        let entries = engine.store().entries_for_transaction(tx.id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entry_delta(&entries, revenue.id), dec!(2.50));
    }

    #[test]
    fn test_debit_account_cannot_overdraw() {
        let engine = engine();
        let account = funded_account(&engine, dec!(30));
        let err = engine
            .debit_account(account.id, dec!(50), None, "clawback")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(engine.account(account.id).unwrap().balance, dec!(30.00));
    }

    #[test]
    fn test_notifier_failure_does_not_break_funding() {
        struct FailingNotifier(Mutex<u32>);
        impl Notifier for FailingNotifier {
            fn notify(&self, _event: &LedgerEvent<'_>) -> anyhow::Result<()> {
                *self.0.lock().unwrap() += 1;
                anyhow::bail!("endpoint unreachable")
            }
        }

        let notifier = Arc::new(FailingNotifier(Mutex::new(0)));
        let engine = LedgerEngine::new(&EngineConfig::default())
            .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>);
        let account = funded_account(&engine, dec!(0));
        engine
            .deposit(DepositRequest::new(account.id, dec!(10)))
            .unwrap();
        assert!(*notifier.0.lock().unwrap() >= 1);
    }
}
