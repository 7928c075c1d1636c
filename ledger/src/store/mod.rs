//! # Storage
//!
//! Two layers: [`db::LedgerDb`] owns the sled trees and bincode codecs,
//! and [`ledger::LedgerStore`] layers per-account locking and the
//! compare-and-swap idempotency anchors on top. Components only talk to
//! the store.

pub mod db;
pub mod ledger;

pub use db::LedgerDb;
pub use ledger::LedgerStore;
