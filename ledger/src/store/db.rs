//! # LedgerDb — Persistent Storage Engine
//!
//! The persistence layer for the wallet ledger, built on sled's embedded
//! key-value store. All on-disk data flows through this module; the atomic
//! per-account semantics live one level up in
//! [`LedgerStore`](super::LedgerStore).
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree with
//! its own keyspace:
//!
//! | Tree             | Key                              | Value                      |
//! |------------------|----------------------------------|----------------------------|
//! | `accounts`       | account id (UTF-8)               | `bincode(Account)`         |
//! | `transactions`   | internal ref (UTF-8)             | `json(Transaction)`        |
//! | `account_txs`    | account id ‖ 0xFF ‖ internal ref | internal ref (UTF-8)       |
//! | `external_refs`  | external ref (UTF-8)             | internal ref (UTF-8)       |
//! | `funding_refs`   | funding ref (UTF-8)              | account id (UTF-8)         |
//! | `email_index`    | email (UTF-8, lowercased)        | account id (UTF-8)         |
//! | `referral_codes` | referral code (UTF-8)            | account id (UTF-8)         |
//! | `pins`           | account id (UTF-8)               | `bincode(PinCredential)`   |
//! | `claims`         | account id ‖ 0xFF ‖ reward tag   | `bincode(RewardClaim)`     |
//!
//! ## Atomicity
//!
//! `external_refs` and `claims` are written with sled `compare_and_swap`,
//! so exactly one writer can ever attach a given external reference or
//! claim a given reward — these two trees are the idempotency and
//! once-only anchors the rest of the subsystem leans on.

use sled::{Db, Tree};
use std::path::Path;

use crate::account::Account;
use crate::error::{LedgerError, LedgerResult};
use crate::pin::PinCredential;
use crate::referral::RewardClaim;
use crate::transaction::Transaction;

/// Separator byte for composite keys. 0xFF never appears in the UTF-8
/// identifiers we compose with, so prefix scans stay unambiguous.
const KEY_SEP: u8 = 0xFF;

/// Persistent storage engine for the wallet ledger.
///
/// Wraps a sled `Db` and exposes typed accessors per tree. Values are
/// bincode for compactness, except transactions: their details enum is
/// internally tagged, which bincode's non-self-describing format cannot
/// decode, so the `transactions` tree stores JSON.
///
/// # Thread Safety
///
/// sled is inherently thread-safe — trees support lock-free concurrent
/// reads and serialized writes. `LedgerDb` can be shared via `Arc` without
/// external synchronization; read-modify-write cycles that must not
/// interleave are serialized by `LedgerStore`, not here.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    /// The underlying sled handle.
    db: Db,
    accounts: Tree,
    transactions: Tree,
    account_txs: Tree,
    external_refs: Tree,
    funding_refs: Tree,
    email_index: Tree,
    referral_codes: Tree,
    pins: Tree,
    claims: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that lives in memory and is cleaned up
    /// when dropped. Ideal for unit tests — no filesystem side effects.
    pub fn open_temporary() -> LedgerResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        Ok(Self {
            accounts: db.open_tree("accounts")?,
            transactions: db.open_tree("transactions")?,
            account_txs: db.open_tree("account_txs")?,
            external_refs: db.open_tree("external_refs")?,
            funding_refs: db.open_tree("funding_refs")?,
            email_index: db.open_tree("email_index")?,
            referral_codes: db.open_tree("referral_codes")?,
            pins: db.open_tree("pins")?,
            claims: db.open_tree("claims")?,
            db,
        })
    }

    // -- Account operations -------------------------------------------------

    /// Persist an account and its lookup indexes (funding ref, email,
    /// referral code). Indexes are plain inserts — the identifiers are
    /// immutable for the account's lifetime, so rewrites are idempotent.
    pub fn put_account(&self, account: &Account) -> LedgerResult<()> {
        let bytes = bincode::serialize(account)?;
        self.accounts.insert(account.id.as_bytes(), bytes)?;
        self.funding_refs
            .insert(account.funding_ref.as_bytes(), account.id.as_bytes())?;
        self.email_index.insert(
            account.email.to_lowercase().as_bytes(),
            account.id.as_bytes(),
        )?;
        self.referral_codes
            .insert(account.referral_code.as_bytes(), account.id.as_bytes())?;
        Ok(())
    }

    /// Retrieve an account by id. `None` if it has never been created.
    pub fn get_account(&self, id: &str) -> LedgerResult<Option<Account>> {
        match self.accounts.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve an account id from a funding (client) reference.
    pub fn account_id_by_funding_ref(&self, funding_ref: &str) -> LedgerResult<Option<String>> {
        self.read_index(&self.funding_refs, funding_ref.as_bytes())
    }

    /// Resolve an account id from a contact email (case-insensitive).
    pub fn account_id_by_email(&self, email: &str) -> LedgerResult<Option<String>> {
        self.read_index(&self.email_index, email.to_lowercase().as_bytes())
    }

    /// Resolve an account id from a referral code.
    pub fn account_id_by_referral_code(&self, code: &str) -> LedgerResult<Option<String>> {
        self.read_index(&self.referral_codes, code.as_bytes())
    }

    fn read_index(&self, tree: &Tree, key: &[u8]) -> LedgerResult<Option<String>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| LedgerError::Storage("non-UTF-8 index value".into()))?,
            )),
            None => Ok(None),
        }
    }

    // -- Transaction operations ---------------------------------------------

    /// Persist a transaction and its per-account index entry.
    pub fn put_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(tx)?;
        self.transactions.insert(tx.internal_ref.as_bytes(), bytes)?;
        self.account_txs.insert(
            composite_key(&tx.account_id, tx.internal_ref.as_bytes()),
            tx.internal_ref.as_bytes(),
        )?;
        Ok(())
    }

    /// Retrieve a transaction by internal reference.
    pub fn get_transaction(&self, internal_ref: &str) -> LedgerResult<Option<Transaction>> {
        match self.transactions.get(internal_ref.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all transactions belonging to an account, in internal-ref
    /// order (no cross-transaction ordering is guaranteed or needed).
    pub fn transactions_for_account(&self, account_id: &str) -> LedgerResult<Vec<Transaction>> {
        let mut prefix = account_id.as_bytes().to_vec();
        prefix.push(KEY_SEP);

        let mut out = Vec::new();
        for entry in self.account_txs.scan_prefix(&prefix) {
            let (_key, internal_ref) = entry?;
            if let Some(bytes) = self.transactions.get(&internal_ref)? {
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Atomically attach an external reference to an internal one.
    ///
    /// Returns `false` if the external reference is already attached to a
    /// *different* internal reference — the caller treats that as a
    /// duplicate delivery. Re-claiming for the same internal reference is
    /// a no-op success, so a settle path can claim early and again at
    /// finalization. This CAS is the idempotency anchor for webhook
    /// replay.
    pub fn try_claim_external_ref(
        &self,
        external_ref: &str,
        internal_ref: &str,
    ) -> LedgerResult<bool> {
        let outcome = self.external_refs.compare_and_swap(
            external_ref.as_bytes(),
            None as Option<&[u8]>,
            Some(internal_ref.as_bytes()),
        )?;
        match outcome {
            Ok(()) => Ok(true),
            Err(cas) => Ok(cas.current.as_deref() == Some(internal_ref.as_bytes())),
        }
    }

    /// Look up the internal reference a provider reference settled under.
    pub fn internal_ref_by_external(&self, external_ref: &str) -> LedgerResult<Option<String>> {
        self.read_index(&self.external_refs, external_ref.as_bytes())
    }

    // -- PIN credential operations ------------------------------------------

    /// Persist a PIN credential, replacing any existing one.
    pub fn put_pin(&self, credential: &PinCredential) -> LedgerResult<()> {
        let bytes = bincode::serialize(credential)?;
        self.pins.insert(credential.account_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Retrieve the PIN credential for an account.
    pub fn get_pin(&self, account_id: &str) -> LedgerResult<Option<PinCredential>> {
        match self.pins.get(account_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the PIN credential entirely (administrative reset).
    pub fn delete_pin(&self, account_id: &str) -> LedgerResult<()> {
        self.pins.remove(account_id.as_bytes())?;
        Ok(())
    }

    // -- Reward claim operations --------------------------------------------

    /// Atomically insert a reward claim. Returns `false` if a claim for
    /// this `(account, reward tag)` already exists — first writer wins.
    pub fn try_insert_claim(
        &self,
        account_id: &str,
        reward_tag: &str,
        claim: &RewardClaim,
    ) -> LedgerResult<bool> {
        let bytes = bincode::serialize(claim)?;
        let outcome = self.claims.compare_and_swap(
            composite_key(account_id, reward_tag.as_bytes()),
            None as Option<&[u8]>,
            Some(bytes.as_slice()),
        )?;
        Ok(outcome.is_ok())
    }

    /// Retrieve a reward claim, if one exists.
    pub fn get_claim(&self, account_id: &str, reward_tag: &str) -> LedgerResult<Option<RewardClaim>> {
        match self
            .claims
            .get(composite_key(account_id, reward_tag.as_bytes()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // -- Utility operations -------------------------------------------------

    /// Number of accounts stored.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of transactions stored.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Force a flush of all pending writes to disk. sled buffers writes in
    /// memory; this blocks until everything is durable.
    pub fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Builds `left ‖ 0xFF ‖ right` composite keys.
fn composite_key(left: &str, right: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(left.len() + 1 + right.len());
    key.extend_from_slice(left.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(right);
    key
}
