//! # Transaction Records
//!
//! Core type definitions for ledger transactions. Every balance-affecting
//! operation in the system produces exactly one of these records, and the
//! record's terminal status is what justifies the balance change.
//!
//! ## Lifecycle
//!
//! Purchases are created `Pending` before the external provider call and
//! finalized to `Success` or `Failed` afterwards. Webhook credits and
//! referral rewards are created directly in `Success` because the event
//! they record has already completed. Terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TransactionKind
// ---------------------------------------------------------------------------

/// Discriminant for what a transaction represents.
///
/// The kind determines the shape of the [`TransactionDetails`] payload and
/// whether the amount is a credit (`TopUp`, `ReferralReward`) or a debit
/// (everything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Inbound funding credit from a payment-gateway webhook.
    TopUp,
    /// Airtime vend to a phone number.
    Airtime,
    /// Data-bundle vend to a phone number.
    Data,
    /// Electricity token purchase for a meter.
    Electricity,
    /// Generic catalog product purchase.
    ProductPurchase,
    /// One-time referral reward credit.
    ReferralReward,
}

impl TransactionKind {
    /// `true` if this kind credits the account rather than debiting it.
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::TopUp | Self::ReferralReward)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopUp => write!(f, "top_up"),
            Self::Airtime => write!(f, "airtime"),
            Self::Data => write!(f, "data"),
            Self::Electricity => write!(f, "electricity"),
            Self::ProductPurchase => write!(f, "product_purchase"),
            Self::ReferralReward => write!(f, "referral_reward"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
///
/// Transitions are one-way: `Pending -> Success` or `Pending -> Failed`.
/// [`LedgerStore::finalize_transaction`](crate::store::LedgerStore) is the
/// only mutator and rejects everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, awaiting a terminal outcome.
    Pending,
    /// Completed; the balance effect has been applied.
    Success,
    /// Terminally failed; the balance is untouched.
    Failed,
}

impl TransactionStatus {
    /// `true` once the status will never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionDetails
// ---------------------------------------------------------------------------

/// Kind-specific structured payload.
///
/// One checkable shape per kind — not an open-ended bag. The `note` field
/// on the record (below) carries the human-readable outcome; these carry
/// the operation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionDetails {
    /// Inbound funding credit.
    TopUp {
        /// Payer email as reported by the gateway.
        payer_email: String,
        /// Currency reported on the event (informational; the ledger is
        /// single-currency).
        currency: String,
    },
    /// Airtime vend.
    Airtime {
        /// Destination phone number.
        phone: String,
        /// Mobile network identifier (e.g. "mtn", "airtel").
        network: String,
    },
    /// Data-bundle vend.
    Data {
        /// Destination phone number.
        phone: String,
        /// Mobile network identifier.
        network: String,
        /// Vendor plan identifier.
        plan_id: String,
    },
    /// Electricity token purchase.
    Electricity {
        /// Meter number.
        meter_number: String,
        /// Distribution company identifier (e.g. "ikeja-electric").
        disco: String,
    },
    /// Generic catalog product.
    ProductPurchase {
        /// Catalog item identifier.
        item_id: String,
        /// Quantity purchased.
        quantity: u32,
    },
    /// Referral reward payout.
    ReferralReward {
        /// Which reward type was claimed (serialized tag).
        reward_type: String,
    },
}

impl TransactionDetails {
    /// The kind these details belong to. Used to keep records internally
    /// consistent when they are assembled from parts.
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::TopUp { .. } => TransactionKind::TopUp,
            Self::Airtime { .. } => TransactionKind::Airtime,
            Self::Data { .. } => TransactionKind::Data,
            Self::Electricity { .. } => TransactionKind::Electricity,
            Self::ProductPurchase { .. } => TransactionKind::ProductPurchase,
            Self::ReferralReward { .. } => TransactionKind::ReferralReward,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A single ledger transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique internal reference, generated at creation. Primary key in
    /// the `transactions` tree.
    pub internal_ref: String,
    /// Owning account.
    pub account_id: String,
    /// What this transaction represents.
    pub kind: TransactionKind,
    /// Amount in kobo. Always positive; direction comes from `kind`.
    pub amount: u64,
    /// Lifecycle state.
    pub status: TransactionStatus,
    /// Provider-assigned reference, when one exists. Unique among
    /// `Success` transactions — this is the webhook idempotency anchor.
    pub external_ref: Option<String>,
    /// Kind-specific payload.
    pub details: TransactionDetails,
    /// Human-readable outcome note (sanitized; raw provider text goes to
    /// the logs, not here).
    pub note: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed (finalization).
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a `Pending` transaction with a fresh internal reference.
    pub fn pending(account_id: &str, amount: u64, details: TransactionDetails) -> Self {
        let now = Utc::now();
        Self {
            internal_ref: new_internal_ref(),
            account_id: account_id.to_string(),
            kind: details.kind(),
            amount,
            status: TransactionStatus::Pending,
            external_ref: None,
            details,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a transaction directly in `Success` — used for webhook
    /// credits and referral rewards, where the recorded event has already
    /// completed.
    pub fn settled(
        account_id: &str,
        amount: u64,
        details: TransactionDetails,
        external_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            internal_ref: new_internal_ref(),
            account_id: account_id.to_string(),
            kind: details.kind(),
            amount,
            status: TransactionStatus::Success,
            external_ref,
            details,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generates a fresh internal reference.
fn new_internal_ref() -> String {
    format!("kobo-tx-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airtime_details() -> TransactionDetails {
        TransactionDetails::Airtime {
            phone: "08031234567".into(),
            network: "mtn".into(),
        }
    }

    #[test]
    fn kind_direction() {
        assert!(TransactionKind::TopUp.is_credit());
        assert!(TransactionKind::ReferralReward.is_credit());
        assert!(!TransactionKind::Airtime.is_credit());
        assert!(!TransactionKind::Electricity.is_credit());
    }

    #[test]
    fn status_terminality() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn pending_record_has_fresh_ref_and_matching_kind() {
        let tx = Transaction::pending("acct_1", 5_000, airtime_details());
        assert!(tx.internal_ref.starts_with("kobo-tx-"));
        assert_eq!(tx.kind, TransactionKind::Airtime);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.external_ref.is_none());
    }

    #[test]
    fn internal_refs_are_unique() {
        let a = Transaction::pending("acct_1", 100, airtime_details());
        let b = Transaction::pending("acct_1", 100, airtime_details());
        assert_ne!(a.internal_ref, b.internal_ref);
    }

    #[test]
    fn settled_record_is_terminal_with_external_ref() {
        let tx = Transaction::settled(
            "acct_1",
            250_000,
            TransactionDetails::TopUp {
                payer_email: "ada@example.com".into(),
                currency: "NGN".into(),
            },
            Some("flw-9f3a".into()),
        );
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.kind, TransactionKind::TopUp);
        assert_eq!(tx.external_ref.as_deref(), Some("flw-9f3a"));
    }

    #[test]
    fn details_tagged_serde_roundtrip() {
        let details = TransactionDetails::Data {
            phone: "08020001111".into(),
            network: "glo".into(),
            plan_id: "data-2gb-30d".into(),
        };
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"type\":\"data\""));
        let recovered: TransactionDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(details, recovered);
    }

    #[test]
    fn kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&TransactionKind::ProductPurchase).unwrap();
        assert_eq!(json, "\"product_purchase\"");
    }
}
