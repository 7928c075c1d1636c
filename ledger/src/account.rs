//! # Accounts
//!
//! The [`Account`] record is the per-user root of the ledger: the balance,
//! the referral counters, and the funding reference that inbound payment
//! webhooks resolve against.
//!
//! ## Balance Discipline
//!
//! `balance` is only ever the result of applying terminal (`Success`)
//! transactions. No client-supplied value is ever written into it — every
//! mutation goes through [`LedgerStore::credit`](crate::store::LedgerStore)
//! or [`LedgerStore::debit`](crate::store::LedgerStore), which serialize
//! access per account. Anything else is a bug, and an expensive one.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::REFERRAL_CODE_LENGTH;

/// A wallet account.
///
/// Created once at signup and mutated thereafter only by the ledger
/// components. Persisted in the `accounts` sled tree as a bincode blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque account identifier.
    pub id: String,
    /// Display name shown in statements and referral notifications.
    pub display_name: String,
    /// Contact email. Doubles as the webhook fallback-resolution key, so
    /// it must match what the payment provider has on file.
    pub email: String,
    /// Available balance in kobo. Never negative by construction.
    pub balance: u64,
    /// Administrative accounts may reset PIN credentials.
    pub is_admin: bool,
    /// Unique invite code handed to prospective referrals.
    pub referral_code: String,
    /// Account id of whoever referred this user, if anyone.
    pub referred_by: Option<String>,
    /// Number of counted referral signups (capped, see config).
    pub total_referrals: u32,
    /// Lifetime referral reward earnings in kobo.
    pub referral_earnings: u64,
    /// Client reference issued when the user's virtual funding account was
    /// created. Inbound transfer webhooks carry this as `tx_ref`.
    pub funding_ref: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new account with a zero balance, a fresh referral code,
    /// and a fresh funding reference.
    pub fn new(id: &str, display_name: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            balance: 0,
            is_admin: false,
            referral_code: generate_referral_code(),
            referred_by: None,
            total_referrals: 0,
            referral_earnings: 0,
            funding_ref: generate_funding_ref(id),
            created_at: Utc::now(),
        }
    }

    /// Formats the balance as a decimal NGN string, for logs and display.
    pub fn balance_display(&self) -> String {
        format_kobo(self.balance)
    }
}

/// Generates a referral code: uppercase alphanumerics of the configured
/// length.
pub fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LENGTH)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}

/// Generates the client reference for an account's virtual funding account.
///
/// The provider echoes this back as `tx_ref` on every inbound transfer, so
/// it must be unique per account and stable for the account's lifetime.
fn generate_funding_ref(account_id: &str) -> String {
    format!("kobo-fund-{}-{}", account_id, uuid::Uuid::new_v4().simple())
}

/// Renders a kobo amount as `NGN 1,234.56`-style text (without the comma
/// grouping — statements do their own formatting).
pub fn format_kobo(amount: u64) -> String {
    format!("NGN {}.{:02}", amount / 100, amount % 100)
}
