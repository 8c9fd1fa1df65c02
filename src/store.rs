//! Account Store and Unit of Work
//!
//! The authoritative shared state: account rows, transaction records,
//! ledger entries, and the system-account registry. Balance-mutating
//! sequences run inside [`Store::atomically`] — the explicit atomic region
//! every locked primitive requires.
//!
//! # Locking discipline
//!
//! Each account row is guarded by its own mutex (the row-level pessimistic
//! lock). A unit of work locks every row it will touch up front, in
//! ascending account-id order, so two units touching the same rows can
//! never deadlock. Guards are held until the unit commits or aborts;
//! balances are snapshotted at lock time and restored on abort, so partial
//! effects are never observable.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::account::{
    Account, AccountId, AccountRole, Principal, PrincipalId, TransferLimits,
    generate_account_number,
};
use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{EntrySide, LedgerEntry, SystemLookup, derive_entries, validate_balanced};
use crate::transaction::{Transaction, TransactionId, TransactionStatus, TransactionType};

/// Shared in-memory account/transaction/ledger state.
pub struct Store {
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
    account_numbers: DashMap<String, AccountId>,
    system_accounts: DashMap<(Currency, AccountRole), AccountId>,
    principals: DashMap<PrincipalId, Principal>,
    transactions: DashMap<TransactionId, Transaction>,
    /// Transactions indexed by source account.
    sent_index: DashMap<AccountId, Vec<TransactionId>>,
    /// Transactions indexed by destination account.
    received_index: DashMap<AccountId, Vec<TransactionId>>,
    entries: DashMap<TransactionId, Vec<LedgerEntry>>,
    system_principal: PrincipalId,
}

impl Store {
    pub fn new() -> Self {
        let system_principal = PrincipalId::new();
        let store = Self {
            accounts: DashMap::new(),
            account_numbers: DashMap::new(),
            system_accounts: DashMap::new(),
            principals: DashMap::new(),
            transactions: DashMap::new(),
            sent_index: DashMap::new(),
            received_index: DashMap::new(),
            entries: DashMap::new(),
            system_principal,
        };
        store.principals.insert(
            system_principal,
            Principal {
                id: system_principal,
                is_active: true,
            },
        );
        store
    }

    /// The distinguished principal that owns all system accounts.
    pub fn system_principal(&self) -> PrincipalId {
        self.system_principal
    }

    // ============================================================
    // Principals
    // ============================================================

    pub fn register_principal(&self) -> PrincipalId {
        let id = PrincipalId::new();
        self.principals.insert(id, Principal { id, is_active: true });
        id
    }

    pub fn set_principal_active(&self, id: PrincipalId, active: bool) {
        if let Some(mut p) = self.principals.get_mut(&id) {
            p.is_active = active;
        }
    }

    /// Unknown principals are treated as inactive.
    pub fn principal_active(&self, id: PrincipalId) -> bool {
        self.principals.get(&id).map(|p| p.is_active).unwrap_or(false)
    }

    // ============================================================
    // Accounts
    // ============================================================

    /// Create a user account. Account numbers are random; collisions are
    /// retried until a free number is claimed.
    pub fn open_account(
        &self,
        owner: PrincipalId,
        currency: Currency,
        limits: TransferLimits,
    ) -> Account {
        self.insert_account(Account::new(owner, currency, AccountRole::User, limits))
    }

    /// Create one of the well-known platform accounts.
    ///
    /// Exactly one account may exist per `(currency, role)`; a second
    /// registration is a precondition failure.
    pub fn open_system_account(
        &self,
        currency: Currency,
        role: AccountRole,
    ) -> LedgerResult<Account> {
        if role == AccountRole::User {
            return Err(LedgerError::Precondition(
                "user accounts are not system accounts",
            ));
        }
        match self.system_accounts.entry((currency, role)) {
            Entry::Occupied(_) => Err(LedgerError::Precondition(
                "system account already registered for currency and role",
            )),
            Entry::Vacant(slot) => {
                let mut account = Account::new(
                    self.system_principal,
                    currency,
                    role,
                    TransferLimits::default(),
                );
                // Platform accounts are not subject to transfer limits.
                account.limits = TransferLimits {
                    per_transaction: Decimal::MAX,
                    daily: Decimal::MAX,
                    monthly: Decimal::MAX,
                };
                slot.insert(account.id);
                Ok(self.insert_account(account))
            }
        }
    }

    fn insert_account(&self, mut account: Account) -> Account {
        loop {
            match self.account_numbers.entry(account.account_number.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(account.id);
                    break;
                }
                Entry::Occupied(_) => {
                    account.account_number = generate_account_number();
                }
            }
        }
        self.accounts
            .insert(account.id, Arc::new(Mutex::new(account.clone())));
        account
    }

    /// Snapshot of an account row. May be stale the moment it returns;
    /// decisions that matter are re-made under the row lock.
    pub fn account(&self, id: AccountId) -> LedgerResult<Account> {
        let arc = self.accounts.get(&id).ok_or(LedgerError::NotFound)?;
        Ok(lock_row(&arc).clone())
    }

    pub fn account_by_number(&self, number: &str) -> LedgerResult<Account> {
        let id = *self.account_numbers.get(number).ok_or(LedgerError::NotFound)?;
        self.account(id)
    }

    pub fn set_account_active(&self, id: AccountId, active: bool) -> LedgerResult<()> {
        let arc = self.accounts.get(&id).ok_or(LedgerError::NotFound)?;
        let mut row = lock_row(&arc);
        row.is_active = active;
        row.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_transfer_allowed(&self, id: AccountId, allowed: bool) -> LedgerResult<()> {
        let arc = self.accounts.get(&id).ok_or(LedgerError::NotFound)?;
        let mut row = lock_row(&arc);
        row.transfer_allowed = allowed;
        row.updated_at = Utc::now();
        Ok(())
    }

    // ============================================================
    // Atomic unit of work
    // ============================================================

    /// Run `f` as one atomic unit over the given accounts.
    ///
    /// Rows are locked in ascending id order and held until the unit
    /// finishes. On `Ok` the staged transaction/entry writes are applied
    /// and the mutated balances kept; on `Err` every balance is restored
    /// to its lock-time snapshot and nothing is persisted.
    pub fn atomically<T>(
        &self,
        accounts: &[AccountId],
        f: impl FnOnce(&mut UnitOfWork<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut ids: Vec<AccountId> = accounts.to_vec();
        ids.sort();
        ids.dedup();

        let arcs: Vec<(AccountId, Arc<Mutex<Account>>)> = ids
            .iter()
            .map(|id| {
                self.accounts
                    .get(id)
                    .map(|a| (*id, Arc::clone(&a)))
                    .ok_or(LedgerError::NotFound)
            })
            .collect::<LedgerResult<_>>()?;

        // Deterministic lock order: ids are sorted above.
        let mut rows: FxHashMap<AccountId, LockedRow<'_>> = FxHashMap::default();
        for (id, arc) in &arcs {
            let guard = lock_row(arc);
            let snapshot = guard.balance;
            rows.insert(
                *id,
                LockedRow {
                    guard,
                    snapshot,
                },
            );
        }

        let mut unit = UnitOfWork {
            store: self,
            rows,
            staged_transactions: Vec::new(),
            staged_updates: Vec::new(),
            staged_entries: Vec::new(),
        };

        match f(&mut unit) {
            Ok(value) => {
                unit.apply();
                Ok(value)
            }
            Err(err) => {
                unit.rollback();
                Err(err)
            }
        }
    }

    // ============================================================
    // Transactions and entries
    // ============================================================

    /// Persist a transaction record outside any unit of work.
    ///
    /// Used for `pending` intents and for the best-effort `failed` audit
    /// records written after a rollback — both carry no ledger entries.
    pub fn insert_transaction(&self, tx: Transaction) -> Transaction {
        self.index_transaction(&tx);
        self.transactions.insert(tx.id, tx.clone());
        tx
    }

    fn index_transaction(&self, tx: &Transaction) {
        self.sent_index.entry(tx.account).or_default().push(tx.id);
        if let Some(dest) = tx.destination_account {
            if dest != tx.account {
                self.received_index.entry(dest).or_default().push(tx.id);
            }
        }
    }

    pub fn transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or(LedgerError::NotFound)
    }

    pub fn entries_for_transaction(&self, id: TransactionId) -> Vec<LedgerEntry> {
        self.entries.get(&id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Transactions sent from `account`, newest last, filtered.
    pub fn sent_transactions(&self, account: AccountId, filter: &TransactionFilter) -> Vec<Transaction> {
        self.collect(&self.sent_index, account, filter)
    }

    /// Transactions received by `account` (as destination), filtered.
    pub fn received_transactions(
        &self,
        account: AccountId,
        filter: &TransactionFilter,
    ) -> Vec<Transaction> {
        self.collect(&self.received_index, account, filter)
    }

    fn collect(
        &self,
        index: &DashMap<AccountId, Vec<TransactionId>>,
        account: AccountId,
        filter: &TransactionFilter,
    ) -> Vec<Transaction> {
        let Some(ids) = index.get(&account) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.transactions.get(id).map(|t| t.clone()))
            .filter(|t| filter.matches(t))
            .collect()
    }

    /// Cumulative completed transfer amount sent from `account` since the
    /// start of the current calendar day (UTC).
    pub fn daily_transferred(&self, account: AccountId, now: DateTime<Utc>) -> Decimal {
        let midnight = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        self.transferred_since(account, midnight)
    }

    /// Cumulative completed transfer amount sent from `account` since the
    /// first day of the current calendar month (UTC).
    pub fn monthly_transferred(&self, account: AccountId, now: DateTime<Utc>) -> Decimal {
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        self.transferred_since(account, month_start)
    }

    fn transferred_since(&self, account: AccountId, since: DateTime<Utc>) -> Decimal {
        let filter = TransactionFilter {
            transaction_type: Some(TransactionType::Transfer),
            status: Some(TransactionStatus::Completed),
            from: Some(since),
            to: None,
        };
        self.sent_transactions(account, &filter)
            .iter()
            .map(|t| t.amount)
            .sum()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLookup for Store {
    fn system_account(&self, currency: Currency, role: AccountRole) -> LedgerResult<AccountId> {
        self.system_accounts
            .get(&(currency, role))
            .map(|id| *id)
            .ok_or(LedgerError::SystemAccount { currency, role })
    }
}

/// Mutex poisoning only happens if a panic fired while a row was held;
/// the row data is still consistent because balances are snapshot-restored,
/// so recover the guard instead of propagating the panic.
fn lock_row<'a>(arc: &'a Arc<Mutex<Account>>) -> MutexGuard<'a, Account> {
    arc.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LockedRow<'a> {
    guard: MutexGuard<'a, Account>,
    snapshot: Decimal,
}

/// Explicit atomic region threaded into every locked mutation primitive.
///
/// Invoking a primitive for an account this unit has not locked is a
/// precondition failure — the "must be inside a transaction" rule, enforced
/// by argument rather than ambient connection state.
pub struct UnitOfWork<'a> {
    store: &'a Store,
    rows: FxHashMap<AccountId, LockedRow<'a>>,
    staged_transactions: Vec<Transaction>,
    staged_updates: Vec<Transaction>,
    staged_entries: Vec<LedgerEntry>,
}

impl<'a> UnitOfWork<'a> {
    fn row(&self, id: AccountId) -> LedgerResult<&LockedRow<'a>> {
        self.rows
            .get(&id)
            .ok_or(LedgerError::Precondition("account not locked by this unit of work"))
    }

    fn row_mut(&mut self, id: AccountId) -> LedgerResult<&mut LockedRow<'a>> {
        self.rows
            .get_mut(&id)
            .ok_or(LedgerError::Precondition("account not locked by this unit of work"))
    }

    /// Locked view of an account row.
    pub fn account(&self, id: AccountId) -> LedgerResult<&Account> {
        Ok(&self.row(id)?.guard)
    }

    /// Current balance under the row lock.
    pub fn balance(&self, id: AccountId) -> LedgerResult<Decimal> {
        Ok(self.row(id)?.guard.balance)
    }

    /// Add quantized `amount` to the locked row, re-quantize, and return
    /// the new balance.
    pub fn add_balance(&mut self, id: AccountId, amount: Decimal) -> LedgerResult<Decimal> {
        let row = self.row_mut(id)?;
        let currency = row.guard.currency;
        let amount = currency.quantize(amount);
        row.guard.balance = currency.quantize(row.guard.balance + amount);
        row.guard.updated_at = Utc::now();
        Ok(row.guard.balance)
    }

    /// Subtract quantized `amount` from the locked row.
    ///
    /// Fails with `InsufficientFunds` if the result would be negative,
    /// unless the account role allows drift below zero (suspense).
    pub fn subtract_balance(&mut self, id: AccountId, amount: Decimal) -> LedgerResult<Decimal> {
        let row = self.row_mut(id)?;
        let currency = row.guard.currency;
        let amount = currency.quantize(amount);
        let next = currency.quantize(row.guard.balance - amount);
        if next < Decimal::ZERO && !row.guard.role.allows_negative_balance() {
            return Err(LedgerError::InsufficientFunds {
                balance: row.guard.balance,
                required: amount,
            });
        }
        row.guard.balance = next;
        row.guard.updated_at = Utc::now();
        Ok(row.guard.balance)
    }

    /// Stage a completed transaction together with its derived, validated
    /// entry pair. Nothing is visible to readers until the unit commits.
    pub fn record(&mut self, tx: Transaction) -> LedgerResult<TransactionId> {
        debug_assert_eq!(tx.status, TransactionStatus::Completed);
        let pair = derive_entries(&tx, self.store)?;
        validate_balanced(&pair)?;
        let now = Utc::now();
        for draft in pair {
            self.staged_entries.push(LedgerEntry {
                id: Uuid::new_v4(),
                transaction: tx.id,
                account: draft.account,
                side: draft.side,
                amount: draft.amount,
                created_at: now,
            });
        }
        let id = tx.id;
        self.staged_transactions.push(tx);
        Ok(id)
    }

    /// Stage the one-shot status transition of an existing `pending`
    /// record. Entries are derived only for the completed outcome.
    pub fn record_transition(&mut self, tx: Transaction) -> LedgerResult<TransactionId> {
        debug_assert!(tx.status.is_terminal());
        if tx.status == TransactionStatus::Completed {
            let pair = derive_entries(&tx, self.store)?;
            validate_balanced(&pair)?;
            let now = Utc::now();
            for draft in pair {
                self.staged_entries.push(LedgerEntry {
                    id: Uuid::new_v4(),
                    transaction: tx.id,
                    account: draft.account,
                    side: draft.side,
                    amount: draft.amount,
                    created_at: now,
                });
            }
        }
        let id = tx.id;
        self.staged_updates.push(tx);
        Ok(id)
    }

    /// Status of an existing transaction, re-read while this unit holds
    /// the relevant account locks.
    pub fn transaction_status(&self, id: TransactionId) -> LedgerResult<TransactionStatus> {
        Ok(self.store.transaction(id)?.status)
    }

    fn apply(self) {
        for tx in self.staged_transactions {
            self.store.index_transaction(&tx);
            self.store.transactions.insert(tx.id, tx);
        }
        for tx in self.staged_updates {
            // Replaces the pending record; indexes already point at it.
            self.store.transactions.insert(tx.id, tx);
        }
        for entry in self.staged_entries {
            self.store
                .entries
                .entry(entry.transaction)
                .or_default()
                .push(entry);
        }
        // Row guards drop here; mutated balances become visible atomically.
    }

    fn rollback(mut self) {
        for row in self.rows.values_mut() {
            row.guard.balance = row.snapshot;
        }
        // Staged writes are discarded with self.
    }
}

/// Filter for transaction listing queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(t) = self.transaction_type {
            if tx.transaction_type != t {
                return false;
            }
        }
        if let Some(s) = self.status {
            if tx.status != s {
                return false;
            }
        }
        if let Some(from) = self.from {
            if tx.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if tx.created_at >= to {
                return false;
            }
        }
        true
    }
}

/// Balance of an account implied by its ledger entries alone.
///
/// Debits and credits change sign with the account's normal balance side;
/// this helper reports credit-minus-debit, which is what user-account
/// reconciliation checks compare against.
pub fn entry_delta(entries: &[LedgerEntry], account: AccountId) -> Decimal {
    entries
        .iter()
        .filter(|e| e.account == account)
        .map(|e| match e.side {
            EntrySide::Credit => e.amount,
            EntrySide::Debit => -e.amount,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn store_with_account(balance: Decimal) -> (Store, AccountId) {
        let store = Store::new();
        let owner = store.register_principal();
        let acc = store.open_account(owner, Currency::USD, TransferLimits::default());
        store
            .atomically(&[acc.id], |uow| {
                uow.add_balance(acc.id, balance)?;
                Ok(())
            })
            .unwrap();
        (store, acc.id)
    }

    #[test]
    fn test_open_account_registers_number() {
        let store = Store::new();
        let owner = store.register_principal();
        let acc = store.open_account(owner, Currency::USD, TransferLimits::default());
        let found = store.account_by_number(&acc.account_number).unwrap();
        assert_eq!(found.id, acc.id);
        assert_eq!(found.balance, Decimal::ZERO);
    }

    #[test]
    fn test_system_account_uniqueness() {
        let store = Store::new();
        store
            .open_system_account(Currency::USD, AccountRole::Asset)
            .unwrap();
        let err = store
            .open_system_account(Currency::USD, AccountRole::Asset)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Precondition(_)));
        // a different currency is fine
        assert!(store
            .open_system_account(Currency::BTC, AccountRole::Asset)
            .is_ok());
    }

    #[test]
    fn test_system_lookup_missing() {
        let store = Store::new();
        assert!(matches!(
            store.system_account(Currency::USD, AccountRole::Revenue),
            Err(LedgerError::SystemAccount { .. })
        ));
    }

    #[test]
    fn test_mutation_outside_unit_lock_fails() {
        let (store, id) = store_with_account(dec!(100));
        let other = {
            let owner = store.register_principal();
            store
                .open_account(owner, Currency::USD, TransferLimits::default())
                .id
        };
        let err = store
            .atomically(&[id], |uow| uow.add_balance(other, dec!(10)).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Precondition(_)));
        // the unlocked account is untouched
        assert_eq!(store.account(other).unwrap().balance, Decimal::ZERO);
    }

    #[test]
    fn test_subtract_below_zero_fails_and_rolls_back() {
        let (store, id) = store_with_account(dec!(100));
        let err = store
            .atomically(&[id], |uow| {
                uow.add_balance(id, dec!(50))?;
                uow.subtract_balance(id, dec!(500))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        // the interim +50 was rolled back with the unit
        assert_eq!(store.account(id).unwrap().balance, dec!(100.00));
    }

    #[test]
    fn test_balances_quantized_on_mutation() {
        let (store, id) = store_with_account(dec!(0));
        store
            .atomically(&[id], |uow| {
                uow.add_balance(id, dec!(10.999))?; // truncated to 10.99
                Ok(())
            })
            .unwrap();
        assert_eq!(store.account(id).unwrap().balance, dec!(10.99));
    }

    #[test]
    fn test_concurrent_additions_do_not_lose_updates() {
        let (store, id) = store_with_account(dec!(0));
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    store
                        .atomically(&[id], |uow| uow.add_balance(id, dec!(1)).map(|_| ()))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.account(id).unwrap().balance, dec!(800.00));
    }

    #[test]
    fn test_daily_and_monthly_aggregation_windows() {
        let (store, id) = store_with_account(dec!(1000));
        let dest = {
            let owner = store.register_principal();
            store
                .open_account(owner, Currency::USD, TransferLimits::default())
                .id
        };

        let mut tx = Transaction::new(
            id,
            Some(dest),
            TransactionType::Transfer,
            None,
            dec!(100),
            Currency::USD,
            TransactionStatus::Completed,
            None,
            "old transfer",
            Default::default(),
        );
        // committed 40 days ago: outside both windows
        tx.created_at = Utc::now() - chrono::Duration::days(40);
        store.insert_transaction(tx);

        let mut tx = Transaction::new(
            id,
            Some(dest),
            TransactionType::Transfer,
            None,
            dec!(25),
            Currency::USD,
            TransactionStatus::Completed,
            None,
            "today",
            Default::default(),
        );
        tx.created_at = Utc::now();
        store.insert_transaction(tx);

        // pending transfers never count
        store.insert_transaction(Transaction::new(
            id,
            Some(dest),
            TransactionType::Transfer,
            None,
            dec!(999),
            Currency::USD,
            TransactionStatus::Pending,
            None,
            "pending",
            Default::default(),
        ));

        let now = Utc::now();
        assert_eq!(store.daily_transferred(id, now), dec!(25));
        // monthly includes today's 25 but not the 40-day-old 100
        assert_eq!(store.monthly_transferred(id, now), dec!(25));
    }

    #[test]
    fn test_entry_delta() {
        let account = AccountId::new();
        let tx = TransactionId::new();
        let entries = vec![
            LedgerEntry {
                id: Uuid::new_v4(),
                transaction: tx,
                account,
                side: EntrySide::Credit,
                amount: dec!(100),
                created_at: Utc::now(),
            },
            LedgerEntry {
                id: Uuid::new_v4(),
                transaction: tx,
                account,
                side: EntrySide::Debit,
                amount: dec!(30),
                created_at: Utc::now(),
            },
        ];
        assert_eq!(entry_delta(&entries, account), dec!(70));
        assert_eq!(entry_delta(&entries, AccountId::new()), dec!(0));
    }
}
