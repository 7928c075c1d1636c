// Copyright (c) 2026 Kobo Payments. MIT License.
// See LICENSE for details.

//! # Kobo Ledger — Core Library
//!
//! The wallet ledger and transaction-integrity core behind the Kobo
//! gateway. Everything in here answers one question: did money move
//! exactly once, for exactly the right reason, with a record to prove it?
//!
//! Amounts are unsigned integer kobo (1/100 NGN) end to end. Floating
//! point appears in exactly one place — the webhook boundary, where the
//! payment gateway's decimal amounts are converted on arrival.
//!
//! ## Architecture
//!
//! The modules mirror the actual concerns of a wallet backend:
//!
//! - **account** — The per-user wallet record and its referral counters.
//! - **transaction** — Transaction records and their one-way lifecycle.
//! - **store** — sled-backed persistence with per-account serialization.
//! - **webhook** — Exactly-once credit from payment-gateway events.
//! - **orchestrator** — Purchases: debit only after confirmed delivery.
//! - **provider** — The vend-provider seam and its test stubs.
//! - **pin** — argon2 PIN credentials with lockout.
//! - **referral** — Invite tracking and once-only reward payouts.
//! - **config** — Every tunable, in one place.
//! - **error** — The one error taxonomy everything classifies into.
//!
//! ## Design Philosophy
//!
//! 1. Balances are derived from settled transactions, never asserted.
//! 2. External references are claimed atomically — replays are no-ops.
//! 3. Ambiguous provider outcomes never debit. Reconciliation is cheaper
//!    than clawing money back.
//! 4. If it touches money, it has tests. Plural.

pub mod account;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pin;
pub mod provider;
pub mod referral;
pub mod store;
pub mod transaction;
pub mod webhook;

pub use account::Account;
pub use error::{LedgerError, LedgerResult};
pub use store::{LedgerDb, LedgerStore};
pub use transaction::{Transaction, TransactionDetails, TransactionKind, TransactionStatus};
