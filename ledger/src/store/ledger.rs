//! # LedgerStore — Atomic Account Operations
//!
//! The serialization layer between the components and [`LedgerDb`]. Every
//! balance mutation is a read-modify-write executed under a per-account
//! lock, so two concurrent credits, or a credit racing a debit, always
//! compose and never lose an update. This is the single most important
//! correctness property in the subsystem; everything else is built on it.
//!
//! Locks are striped per account in a `DashMap` — operations on different
//! accounts never contend, and the store does not serialize unrelated
//! reads.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::db::LedgerDb;
use crate::account::Account;
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TransactionDetails, TransactionStatus};

/// Atomic, keyed access to accounts, transactions, credentials, and claims.
///
/// Cheap to clone — all state is behind `Arc`.
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<LedgerDb>,
    /// Per-account lock stripes. Entries are created on first use and
    /// never removed; one `Arc<Mutex>` per account is cheap.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LedgerStore {
    /// Wraps an opened database.
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self {
            db,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// A store backed by a temporary in-memory database. Test convenience.
    pub fn in_memory() -> LedgerResult<Self> {
        Ok(Self::new(Arc::new(LedgerDb::open_temporary()?)))
    }

    /// Direct access to the storage engine, for components that manage
    /// their own trees (PIN credentials, reward claims) and for test
    /// fixtures that seed records.
    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    /// Runs `f` while holding the account's lock. Components use this when
    /// a multi-step mutation must not interleave with balance operations
    /// on the same account.
    pub(crate) fn with_account_lock<T>(
        &self,
        account_id: &str,
        f: impl FnOnce() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let lock = self
            .locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }

    // -- Accounts -----------------------------------------------------------

    /// Creates an account. The email must not already be registered.
    pub fn create_account(&self, mut account: Account) -> LedgerResult<Account> {
        if self.db.account_id_by_email(&account.email)?.is_some() {
            return Err(LedgerError::Validation(format!(
                "email {} is already registered",
                account.email
            )));
        }
        if self.db.get_account(&account.id)?.is_some() {
            return Err(LedgerError::Validation(format!(
                "account {} already exists",
                account.id
            )));
        }
        // Referral codes are random; retry on the rare collision so the
        // code index never remaps an existing entry.
        while self
            .db
            .account_id_by_referral_code(&account.referral_code)?
            .is_some()
        {
            account.referral_code = crate::account::generate_referral_code();
        }
        self.db.put_account(&account)?;
        Ok(account)
    }

    /// Fetches an account or fails with `NotFound`.
    pub fn get_account(&self, id: &str) -> LedgerResult<Account> {
        self.db
            .get_account(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    /// Resolves an account by its virtual-funding client reference.
    pub fn account_by_funding_ref(&self, funding_ref: &str) -> LedgerResult<Option<Account>> {
        match self.db.account_id_by_funding_ref(funding_ref)? {
            Some(id) => Ok(self.db.get_account(&id)?),
            None => Ok(None),
        }
    }

    /// Resolves an account by contact email.
    pub fn account_by_email(&self, email: &str) -> LedgerResult<Option<Account>> {
        match self.db.account_id_by_email(email)? {
            Some(id) => Ok(self.db.get_account(&id)?),
            None => Ok(None),
        }
    }

    /// Resolves an account by referral code.
    pub fn account_by_referral_code(&self, code: &str) -> LedgerResult<Option<Account>> {
        match self.db.account_id_by_referral_code(code)? {
            Some(id) => Ok(self.db.get_account(&id)?),
            None => Ok(None),
        }
    }

    /// Applies an arbitrary mutation to an account under its lock and
    /// persists the result. `f` sees the freshly-read record.
    pub fn update_account(
        &self,
        id: &str,
        f: impl FnOnce(&mut Account) -> LedgerResult<()>,
    ) -> LedgerResult<Account> {
        self.with_account_lock(id, || {
            let mut account = self.get_account(id)?;
            f(&mut account)?;
            self.db.put_account(&account)?;
            Ok(account)
        })
    }

    // -- Balance operations -------------------------------------------------

    /// Atomically adds `amount` to the account balance.
    pub fn credit(&self, id: &str, amount: u64) -> LedgerResult<Account> {
        if amount == 0 {
            return Err(LedgerError::Validation("credit amount must be > 0".into()));
        }
        self.update_account(id, |account| {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Validation("balance overflow".into()))?;
            Ok(())
        })
    }

    /// Atomically subtracts `amount` from the account balance. Fails
    /// closed with `InsufficientBalance` — the balance never goes
    /// negative.
    pub fn debit(&self, id: &str, amount: u64) -> LedgerResult<Account> {
        if amount == 0 {
            return Err(LedgerError::Validation("debit amount must be > 0".into()));
        }
        self.update_account(id, |account| {
            if account.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    available: account.balance,
                    requested: amount,
                });
            }
            account.balance -= amount;
            Ok(())
        })
    }

    /// Atomically: attach the external reference (first writer wins),
    /// credit the account, and record a `Success` transaction — all under
    /// the account lock. A losing reference claim is `DuplicateEvent` and
    /// mutates nothing.
    ///
    /// Returns the recorded transaction plus the balance before and after,
    /// for the caller's audit log.
    pub fn credit_with_external_ref(
        &self,
        account_id: &str,
        amount: u64,
        external_ref: &str,
        details: TransactionDetails,
    ) -> LedgerResult<(Transaction, u64, u64)> {
        if amount == 0 {
            return Err(LedgerError::Validation("credit amount must be > 0".into()));
        }
        self.with_account_lock(account_id, || {
            let mut account = self.get_account(account_id)?;

            let tx = Transaction::settled(
                account_id,
                amount,
                details,
                Some(external_ref.to_string()),
            );
            if !self
                .db
                .try_claim_external_ref(external_ref, &tx.internal_ref)?
            {
                return Err(LedgerError::DuplicateEvent(external_ref.to_string()));
            }

            let before = account.balance;
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Validation("balance overflow".into()))?;
            self.db.put_account(&account)?;
            self.db.put_transaction(&tx)?;

            Ok((tx, before, account.balance))
        })
    }

    // -- Transactions -------------------------------------------------------

    /// Persists a transaction record.
    pub fn record_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        self.db.put_transaction(tx)
    }

    /// Fetches a transaction or fails with `NotFound`.
    pub fn get_transaction(&self, internal_ref: &str) -> LedgerResult<Transaction> {
        self.db
            .get_transaction(internal_ref)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {internal_ref}")))
    }

    /// Finds the transaction a provider reference settled under, if any.
    pub fn find_by_external_ref(&self, external_ref: &str) -> LedgerResult<Option<Transaction>> {
        match self.db.internal_ref_by_external(external_ref)? {
            Some(internal_ref) => Ok(self.db.get_transaction(&internal_ref)?),
            None => Ok(None),
        }
    }

    /// Lists an account's transactions.
    pub fn transactions_for_account(&self, account_id: &str) -> LedgerResult<Vec<Transaction>> {
        self.db.transactions_for_account(account_id)
    }

    /// Moves a `Pending` transaction to a terminal status. The only status
    /// mutator in the crate: terminal records are immutable, and any
    /// attempt to re-finalize is rejected.
    ///
    /// Finalizing to `Success` with an external reference claims that
    /// reference in the idempotency index, so at most one `Success` record
    /// ever settles under a given reference. A losing claim is
    /// `DuplicateEvent` and the record stays `Pending`, untouched.
    pub fn finalize_transaction(
        &self,
        internal_ref: &str,
        status: TransactionStatus,
        note: Option<String>,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        if !status.is_terminal() {
            return Err(LedgerError::Validation(
                "finalize requires a terminal status".into(),
            ));
        }
        let mut tx = self.get_transaction(internal_ref)?;
        if tx.status.is_terminal() {
            return Err(LedgerError::Validation(format!(
                "transaction {internal_ref} is already {}",
                tx.status
            )));
        }
        if external_ref.is_some() {
            tx.external_ref = external_ref;
        }
        if status == TransactionStatus::Success {
            if let Some(ext) = tx.external_ref.as_deref() {
                if !self.db.try_claim_external_ref(ext, internal_ref)? {
                    return Err(LedgerError::DuplicateEvent(ext.to_string()));
                }
            }
        }
        tx.status = status;
        tx.note = note;
        tx.updated_at = chrono::Utc::now();
        self.db.put_transaction(&tx)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;
    use std::thread;

    fn store_with_account(id: &str, balance: u64) -> LedgerStore {
        let store = LedgerStore::in_memory().unwrap();
        let mut account = Account::new(id, "Test User", &format!("{id}@example.com"));
        account.balance = balance;
        store.db().put_account(&account).unwrap();
        store
    }

    fn topup_details() -> TransactionDetails {
        TransactionDetails::TopUp {
            payer_email: "payer@example.com".into(),
            currency: "NGN".into(),
        }
    }

    #[test]
    fn create_account_rejects_duplicate_email() {
        let store = LedgerStore::in_memory().unwrap();
        store
            .create_account(Account::new("a1", "Ada", "ada@example.com"))
            .unwrap();

        let result = store.create_account(Account::new("a2", "Other", "ada@example.com"));
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn create_account_regenerates_colliding_referral_code() {
        let store = LedgerStore::in_memory().unwrap();
        let first = store
            .create_account(Account::new("a1", "Ada", "ada@example.com"))
            .unwrap();

        let mut second = Account::new("a2", "Bisi", "bisi@example.com");
        second.referral_code = first.referral_code.clone();
        let second = store.create_account(second).unwrap();

        assert_ne!(second.referral_code, first.referral_code);
        // The original code still resolves to its owner.
        let resolved = store
            .account_by_referral_code(&first.referral_code)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "a1");
    }

    #[test]
    fn get_account_unknown_is_not_found() {
        let store = LedgerStore::in_memory().unwrap();
        assert!(matches!(
            store.get_account("ghost"),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn credit_and_debit_adjust_balance() {
        let store = store_with_account("acct_1", 1_000);

        let account = store.credit("acct_1", 500).unwrap();
        assert_eq!(account.balance, 1_500);

        let account = store.debit("acct_1", 700).unwrap();
        assert_eq!(account.balance, 800);
    }

    #[test]
    fn debit_fails_closed() {
        let store = store_with_account("acct_1", 100);

        let result = store.debit("acct_1", 200);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance {
                available: 100,
                requested: 200,
            })
        ));
        // Balance untouched on failure.
        assert_eq!(store.get_account("acct_1").unwrap().balance, 100);
    }

    #[test]
    fn zero_amounts_rejected() {
        let store = store_with_account("acct_1", 100);
        assert!(store.credit("acct_1", 0).is_err());
        assert!(store.debit("acct_1", 0).is_err());
    }

    #[test]
    fn concurrent_credits_never_lose_updates() {
        let store = store_with_account("acct_1", 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        store.credit("acct_1", 10).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 8 threads x 50 credits x 10 kobo.
        assert_eq!(store.get_account("acct_1").unwrap().balance, 4_000);
    }

    #[test]
    fn credit_racing_debit_composes() {
        let store = store_with_account("acct_1", 10_000);

        let creditor = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    store.credit("acct_1", 7).unwrap();
                }
            })
        };
        let debitor = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    store.debit("acct_1", 3).unwrap();
                }
            })
        };
        creditor.join().unwrap();
        debitor.join().unwrap();

        assert_eq!(
            store.get_account("acct_1").unwrap().balance,
            10_000 + 100 * 7 - 100 * 3
        );
    }

    #[test]
    fn credit_with_external_ref_is_idempotent() {
        let store = store_with_account("acct_1", 0);

        let (tx, before, after) = store
            .credit_with_external_ref("acct_1", 5_000, "flw-42", topup_details())
            .unwrap();
        assert_eq!(before, 0);
        assert_eq!(after, 5_000);
        assert_eq!(tx.kind, TransactionKind::TopUp);
        assert_eq!(tx.status, TransactionStatus::Success);

        // Replay: same external ref, any number of times.
        for _ in 0..3 {
            let result =
                store.credit_with_external_ref("acct_1", 5_000, "flw-42", topup_details());
            assert!(matches!(result, Err(LedgerError::DuplicateEvent(_))));
        }

        // Exactly one credit and one transaction.
        assert_eq!(store.get_account("acct_1").unwrap().balance, 5_000);
        assert_eq!(store.transactions_for_account("acct_1").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_external_ref_across_accounts_rejected() {
        let store = store_with_account("acct_1", 0);
        let mut other = Account::new("acct_2", "Other", "other@example.com");
        other.balance = 0;
        store.db().put_account(&other).unwrap();

        store
            .credit_with_external_ref("acct_1", 1_000, "flw-7", topup_details())
            .unwrap();
        let result = store.credit_with_external_ref("acct_2", 1_000, "flw-7", topup_details());
        assert!(matches!(result, Err(LedgerError::DuplicateEvent(_))));
        assert_eq!(store.get_account("acct_2").unwrap().balance, 0);
    }

    #[test]
    fn find_by_external_ref_resolves_settled_transaction() {
        let store = store_with_account("acct_1", 0);
        let (tx, _, _) = store
            .credit_with_external_ref("acct_1", 2_500, "flw-77", topup_details())
            .unwrap();

        let found = store.find_by_external_ref("flw-77").unwrap().unwrap();
        assert_eq!(found.internal_ref, tx.internal_ref);
        assert!(store.find_by_external_ref("flw-none").unwrap().is_none());
    }

    #[test]
    fn finalize_is_one_way() {
        let store = store_with_account("acct_1", 1_000);
        let tx = Transaction::pending(
            "acct_1",
            100,
            TransactionDetails::Airtime {
                phone: "08030000000".into(),
                network: "mtn".into(),
            },
        );
        store.record_transaction(&tx).unwrap();

        let finalized = store
            .finalize_transaction(&tx.internal_ref, TransactionStatus::Failed, None, None)
            .unwrap();
        assert_eq!(finalized.status, TransactionStatus::Failed);

        // Terminal records never change again.
        let replay = store.finalize_transaction(
            &tx.internal_ref,
            TransactionStatus::Success,
            None,
            None,
        );
        assert!(matches!(replay, Err(LedgerError::Validation(_))));
        assert_eq!(
            store.get_transaction(&tx.internal_ref).unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[test]
    fn finalize_success_claims_the_external_ref() {
        let store = store_with_account("acct_1", 1_000);
        let tx = Transaction::pending(
            "acct_1",
            100,
            TransactionDetails::Airtime {
                phone: "08030000000".into(),
                network: "mtn".into(),
            },
        );
        store.record_transaction(&tx).unwrap();

        let settled = store
            .finalize_transaction(
                &tx.internal_ref,
                TransactionStatus::Success,
                Some("delivered".into()),
                Some("prov-900".into()),
            )
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);

        // The provider reference now resolves the settled record.
        let found = store.find_by_external_ref("prov-900").unwrap().unwrap();
        assert_eq!(found.internal_ref, tx.internal_ref);

        // A second record cannot settle under the same reference.
        let other = Transaction::pending(
            "acct_1",
            100,
            TransactionDetails::Airtime {
                phone: "08030000000".into(),
                network: "mtn".into(),
            },
        );
        store.record_transaction(&other).unwrap();
        let result = store.finalize_transaction(
            &other.internal_ref,
            TransactionStatus::Success,
            None,
            Some("prov-900".into()),
        );
        assert!(matches!(result, Err(LedgerError::DuplicateEvent(_))));
        assert_eq!(
            store.get_transaction(&other.internal_ref).unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[test]
    fn finalize_rejects_pending_target_status() {
        let store = store_with_account("acct_1", 1_000);
        let tx = Transaction::pending(
            "acct_1",
            100,
            TransactionDetails::Airtime {
                phone: "08030000000".into(),
                network: "mtn".into(),
            },
        );
        store.record_transaction(&tx).unwrap();

        let result =
            store.finalize_transaction(&tx.internal_ref, TransactionStatus::Pending, None, None);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
