//! # Ledger Configuration & Constants
//!
//! Every tunable in the wallet subsystem lives here. If you're hardcoding a
//! threshold somewhere else, you're doing it wrong and you owe the team
//! coffee.
//!
//! Amounts are in kobo (1/100 NGN) throughout — the ledger never touches
//! floating point. Provider-facing decimal conversion happens exactly once,
//! at the webhook boundary.

use std::time::Duration;

// ---------------------------------------------------------------------------
// PIN Authorization
// ---------------------------------------------------------------------------

/// PIN length in digits. Four digits, always. Not five, not six. Four.
pub const PIN_LENGTH: usize = 4;

/// Consecutive failed verifications before the credential locks.
pub const PIN_MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long a locked credential stays locked. Thirty minutes is long enough
/// to stop an online guessing run and short enough that support doesn't
/// drown in unlock tickets.
pub const PIN_LOCKOUT_WINDOW: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Provider Calls
// ---------------------------------------------------------------------------

/// Upper bound on a single outbound vend call. Past this, the outcome is
/// ambiguous and the orchestrator resolves the purchase as failed without
/// debiting. Retries are the caller's business, not ours.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Referral Program
// ---------------------------------------------------------------------------

/// Referrals required before any reward can be claimed.
pub const REFERRAL_REQUIRED_COUNT: u32 = 5;

/// Hard cap on counted invites per account. Beyond this the tracking
/// endpoint reports `limit_reached` and stops incrementing.
pub const REFERRAL_INVITE_CAP: u32 = 50;

/// Fixed airtime reward, in kobo (NGN 500).
pub const REWARD_AIRTIME_KOBO: u64 = 50_000;

/// Fixed cash reward, in kobo (NGN 1,000).
pub const REWARD_CASH_KOBO: u64 = 100_000;

/// Data-bundle reward price table: `(plan_id, price in kobo)`.
///
/// Mirrors the vendor catalog for the plans we hand out as rewards. Keep in
/// sync with the vendor's price list; a stale entry here means we credit the
/// wrong amount.
pub const REWARD_DATA_PLANS: &[(&str, u64)] = &[
    ("data-1gb-30d", 30_000),
    ("data-2gb-30d", 55_000),
    ("data-5gb-30d", 125_000),
];

/// Looks up a reward data plan price by id. Returns `None` for unknown
/// plans — we don't guess at prices.
pub fn reward_data_plan_price(plan_id: &str) -> Option<u64> {
    REWARD_DATA_PLANS
        .iter()
        .find(|(id, _)| *id == plan_id)
        .map(|(_, price)| *price)
}

// ---------------------------------------------------------------------------
// Referral Codes
// ---------------------------------------------------------------------------

/// Length of generated referral codes. Eight alphanumerics gives ~2^41
/// possibilities — collisions are handled by retrying on insert, but at
/// this length you'll retire before you see one.
pub const REFERRAL_CODE_LENGTH: usize = 8;

// ---------------------------------------------------------------------------
// Service Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port for the gateway.
pub const DEFAULT_API_PORT: u16 = 8460;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 8461;

/// Library version string, assembled at compile time.
pub const LEDGER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_window_is_thirty_minutes() {
        assert_eq!(PIN_LOCKOUT_WINDOW, Duration::from_secs(1800));
    }

    #[test]
    fn reward_plan_lookup_known_and_unknown() {
        assert_eq!(reward_data_plan_price("data-1gb-30d"), Some(30_000));
        assert_eq!(reward_data_plan_price("data-999tb"), None);
    }

    #[test]
    fn reward_plan_ids_are_distinct() {
        // A duplicated plan id would make the lookup silently pick the first
        // entry. Stranger things have shipped to production.
        for (i, (id_a, _)) in REWARD_DATA_PLANS.iter().enumerate() {
            for (id_b, _) in REWARD_DATA_PLANS.iter().skip(i + 1) {
                assert_ne!(id_a, id_b);
            }
        }
    }

    #[test]
    fn thresholds_sanity() {
        assert!(PIN_MAX_FAILED_ATTEMPTS > 0);
        assert!(REFERRAL_REQUIRED_COUNT <= REFERRAL_INVITE_CAP);
        assert!(PROVIDER_TIMEOUT.as_secs() > 0);
    }
}
