//! # PIN Authorization
//!
//! Transaction PINs gate every balance-spending operation. The PIN itself
//! is never stored or logged — only an argon2 hash with a per-credential
//! random salt. Verification is rate-limited: five consecutive failures
//! lock the credential for thirty minutes, and while locked, verification
//! fails even for the correct PIN.
//!
//! All state transitions on a credential happen under the owning account's
//! lock, so concurrent wrong-PIN submissions count every failure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::config::{PIN_LENGTH, PIN_LOCKOUT_WINDOW, PIN_MAX_FAILED_ATTEMPTS};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

// ---------------------------------------------------------------------------
// PinCredential
// ---------------------------------------------------------------------------

/// A stored PIN credential: the hash plus the lockout counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    /// Owning account.
    pub account_id: String,
    /// Argon2 PHC-format hash of the PIN.
    pub hashed_secret: String,
    /// Consecutive failed verifications since the last success.
    pub failed_attempts: u32,
    /// If set and in the future, the credential is locked until then.
    pub locked_until: Option<DateTime<Utc>>,
}

impl PinCredential {
    /// A fresh credential with clean counters.
    pub fn new(account_id: &str, hashed_secret: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            hashed_secret: hashed_secret.to_string(),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    /// `true` if the lockout window is still running at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

/// Read-only credential state, for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinStatus {
    /// Whether a PIN has been set at all.
    pub has_pin: bool,
    /// Whether the credential is currently locked.
    pub is_locked: bool,
    /// When the lock expires, if locked.
    pub locked_until: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// PinAuthority
// ---------------------------------------------------------------------------

/// Manages PIN credentials: set, verify, status, administrative reset.
#[derive(Clone)]
pub struct PinAuthority {
    store: LedgerStore,
}

impl PinAuthority {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Sets or changes an account's PIN.
    ///
    /// Changing an existing PIN requires the current one, and the check
    /// counts toward the same lockout as ordinary verification — a locked
    /// credential cannot be rotated past its lock.
    pub fn set_pin(
        &self,
        account_id: &str,
        new_pin: &str,
        current_pin: Option<&str>,
    ) -> LedgerResult<()> {
        validate_pin_format(new_pin)?;
        // Account must exist before a credential can be attached.
        self.store.get_account(account_id)?;

        self.store.with_account_lock(account_id, || {
            if let Some(existing) = self.store.db().get_pin(account_id)? {
                let current = current_pin.ok_or_else(|| {
                    LedgerError::Validation("current PIN required to change PIN".into())
                })?;
                self.check_credential(existing, current)?;
            }

            let credential = PinCredential::new(account_id, &hash_pin(new_pin)?);
            self.store.db().put_pin(&credential)?;
            info!(account_id, "PIN credential set");
            Ok(())
        })
    }

    /// Verifies a submitted PIN against the stored credential.
    ///
    /// Success resets the failure counter. Failure increments it, and the
    /// failure that reaches the threshold locks the credential for the
    /// full lockout window.
    pub fn verify(&self, account_id: &str, pin: &str) -> LedgerResult<()> {
        self.store.with_account_lock(account_id, || {
            let credential = self
                .store
                .db()
                .get_pin(account_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("PIN for account {account_id}")))?;
            self.check_credential(credential, pin)
        })
    }

    /// Credential state for the status endpoint. Never reveals the hash.
    pub fn status(&self, account_id: &str) -> LedgerResult<PinStatus> {
        self.store.get_account(account_id)?;
        let now = Utc::now();
        Ok(match self.store.db().get_pin(account_id)? {
            Some(credential) => {
                let is_locked = credential.is_locked_at(now);
                PinStatus {
                    has_pin: true,
                    is_locked,
                    locked_until: if is_locked { credential.locked_until } else { None },
                }
            }
            None => PinStatus {
                has_pin: false,
                is_locked: false,
                locked_until: None,
            },
        })
    }

    /// Administrative reset: deletes the credential so the user can set a
    /// new PIN. Only administrative accounts may call this.
    pub fn reset(&self, account_id: &str, requested_by: &str) -> LedgerResult<()> {
        let admin = self.store.get_account(requested_by)?;
        if !admin.is_admin {
            return Err(LedgerError::Validation(
                "PIN reset requires an administrative account".into(),
            ));
        }
        self.store.get_account(account_id)?;
        self.store.with_account_lock(account_id, || {
            self.store.db().delete_pin(account_id)?;
            warn!(account_id, requested_by, "PIN credential reset by admin");
            Ok(())
        })
    }

    /// The shared verification path: lock check, hash comparison, counter
    /// bookkeeping. Caller holds the account lock.
    fn check_credential(&self, mut credential: PinCredential, pin: &str) -> LedgerResult<()> {
        let now = Utc::now();

        let mut expired_lock_cleared = false;
        if let Some(until) = credential.locked_until {
            if until > now {
                return Err(LedgerError::Locked {
                    minutes_remaining: minutes_until(until, now),
                });
            }
            // Lock expired: clean slate before this attempt is judged.
            credential.locked_until = None;
            credential.failed_attempts = 0;
            expired_lock_cleared = true;
        }

        if verify_pin(pin, &credential.hashed_secret) {
            if expired_lock_cleared || credential.failed_attempts > 0 {
                credential.failed_attempts = 0;
                self.store.db().put_pin(&credential)?;
            }
            return Ok(());
        }

        credential.failed_attempts += 1;
        if credential.failed_attempts >= PIN_MAX_FAILED_ATTEMPTS {
            let until = now
                + ChronoDuration::from_std(PIN_LOCKOUT_WINDOW)
                    .unwrap_or_else(|_| ChronoDuration::minutes(30));
            credential.locked_until = Some(until);
            self.store.db().put_pin(&credential)?;
            warn!(
                account_id = %credential.account_id,
                attempts = credential.failed_attempts,
                "PIN credential locked"
            );
            return Err(LedgerError::Locked {
                minutes_remaining: minutes_until(until, now),
            });
        }

        let remaining = PIN_MAX_FAILED_ATTEMPTS - credential.failed_attempts;
        self.store.db().put_pin(&credential)?;
        Err(LedgerError::WrongPin {
            attempts_remaining: remaining,
        })
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Hashes a PIN with argon2 and a fresh random salt.
fn hash_pin(pin: &str) -> LedgerResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LedgerError::Storage(format!("PIN hashing failed: {e}")))
}

/// Constant-ish time verification against a PHC-format hash. An unparsable
/// stored hash verifies as false rather than erroring — the caller sees an
/// ordinary wrong-PIN path and the operator sees the log.
fn verify_pin(pin: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "stored PIN hash is unparsable");
            false
        }
    }
}

/// Exactly [`PIN_LENGTH`] ASCII digits.
fn validate_pin_format(pin: &str) -> LedgerResult<()> {
    if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::Validation(format!(
            "PIN must be exactly {PIN_LENGTH} digits"
        )));
    }
    Ok(())
}

/// Whole minutes until `until`, rounded up, minimum 1.
fn minutes_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (until - now).num_seconds().max(0);
    ((seconds + 59) / 60).max(1)
}
