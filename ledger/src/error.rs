//! # Error Taxonomy
//!
//! One enum for every way the wallet subsystem can say no. Components
//! classify failures into these variants exactly once, at the boundary
//! where the failure occurs — nothing downstream re-parses error strings.
//!
//! Raw provider error text never leaves this crate in a user-facing field:
//! [`LedgerError::user_message`] produces the sanitized category message,
//! and the raw detail goes to the transaction record and the logs.

use thiserror::Error;

/// Everything that can go wrong in the ledger subsystem.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed input, rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A debit would take the balance below zero.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance at the time of the check, in kobo.
        available: u64,
        /// The amount that was requested, in kobo.
        requested: u64,
    },

    /// A webhook event we have already credited. Not a true error — the
    /// caller acknowledges it as success so the provider stops retrying.
    #[error("duplicate event: external reference {0} already settled")]
    DuplicateEvent(String),

    /// The vend provider could not be reached, or the call timed out
    /// before a definitive outcome.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The vend provider confirmed a failure.
    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    /// Webhook payer contact does not match the resolved account. A hard
    /// failure — we never credit on a mismatch.
    #[error("payer contact does not match the account on record")]
    AuthenticationMismatch,

    /// Wrong PIN submitted. Carries how many attempts remain before lockout.
    #[error("wrong PIN ({attempts_remaining} attempts remaining)")]
    WrongPin {
        /// Attempts left before the credential locks.
        attempts_remaining: u32,
    },

    /// The PIN credential is locked. Verification fails regardless of the
    /// submitted PIN until the window elapses.
    #[error("PIN locked, try again in {minutes_remaining} minutes")]
    Locked {
        /// Whole minutes until the lock expires (rounded up, minimum 1).
        minutes_remaining: i64,
    },

    /// The referral reward for this type was already paid out.
    #[error("reward already claimed")]
    AlreadyClaimed,

    /// The account has not reached the referral threshold.
    #[error("not eligible: {current} of {required} referrals")]
    NotEligible {
        /// Current referral count.
        current: u32,
        /// Required referral count.
        required: u32,
    },

    /// Unknown account, transaction, or credential.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage-layer failure (sled or serialization).
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// The message safe to show an end user. Provider detail and internal
    /// identifiers stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::InsufficientBalance { .. } => "Insufficient balance.".to_string(),
            Self::DuplicateEvent(_) => "Already processed.".to_string(),
            Self::ProviderUnavailable(_) => {
                "Service temporarily unavailable, please try again later.".to_string()
            }
            Self::ProviderRejected(_) => {
                "The purchase was rejected. Please contact support.".to_string()
            }
            Self::AuthenticationMismatch => "Payment could not be verified.".to_string(),
            Self::WrongPin { attempts_remaining } => {
                format!("Incorrect PIN. {attempts_remaining} attempts remaining.")
            }
            Self::Locked { minutes_remaining } => {
                format!("PIN locked. Try again in {minutes_remaining} minutes.")
            }
            Self::AlreadyClaimed => "This reward has already been claimed.".to_string(),
            Self::NotEligible { current, required } => {
                format!("Not eligible yet: {current} of {required} referrals.")
            }
            Self::NotFound(_) => "Not found.".to_string(),
            Self::Storage(_) => "Something went wrong. Please try again.".to_string(),
        }
    }

    /// `true` for conditions a provider should treat as final success and
    /// stop retrying (idempotent no-ops).
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(self, Self::DuplicateEvent(_))
    }
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type LedgerResult<T> = Result<T, LedgerError>;
