//! # Referral Rewards
//!
//! Invite tracking and once-only reward payouts. An account accumulates
//! counted referrals up to a hard cap, becomes eligible at the configured
//! threshold, and may then claim each reward type exactly once — ever.
//!
//! The once-only guarantee does not depend on the eligibility check: the
//! claim record itself is inserted with a compare-and-swap keyed on
//! `(account, reward type)`, so two concurrent claims for the same type
//! settle to exactly one payout regardless of interleaving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::format_kobo;
use crate::config::{
    reward_data_plan_price, REFERRAL_INVITE_CAP, REFERRAL_REQUIRED_COUNT, REWARD_AIRTIME_KOBO,
    REWARD_CASH_KOBO,
};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionDetails};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A reward an eligible referrer can claim. Each discriminant is claimable
/// once per account; the data variant's plan choice does not open extra
/// claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardType {
    /// A data bundle from the reward plan table.
    Data { plan_id: String },
    /// Fixed airtime credit.
    Airtime,
    /// Fixed cash credit.
    Cash,
}

impl RewardType {
    /// Claim-record key for this reward. One tag per discriminant.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Airtime => "airtime",
            Self::Cash => "cash",
        }
    }

    /// Credit value in kobo. Unknown data plans are rejected — prices come
    /// from the table, never from the request.
    pub fn value_kobo(&self) -> LedgerResult<u64> {
        match self {
            Self::Data { plan_id } => reward_data_plan_price(plan_id).ok_or_else(|| {
                LedgerError::Validation(format!("unknown reward data plan {plan_id}"))
            }),
            Self::Airtime => Ok(REWARD_AIRTIME_KOBO),
            Self::Cash => Ok(REWARD_CASH_KOBO),
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Data { plan_id } => format!("referral data reward ({plan_id})"),
            Self::Airtime => "referral airtime reward".to_string(),
            Self::Cash => "referral cash reward".to_string(),
        }
    }
}

/// Persisted record of a paid-out reward. The compare-and-swap on this
/// record is what makes claims once-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    pub account_id: String,
    /// [`RewardType::tag`] of the claimed reward.
    pub reward_tag: String,
    /// Human-readable description of what was paid.
    pub details: String,
    pub claimed_at: DateTime<Utc>,
}

/// Result of a referral-count update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralUpdate {
    /// Counted referrals after this update.
    pub new_total_referrals: u32,
    /// `true` once the invite cap is reached; further invites stop counting.
    pub limit_reached: bool,
}

/// Eligibility snapshot for the referral program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub current_count: u32,
    pub required_count: u32,
}

// ---------------------------------------------------------------------------
// ReferralEngine
// ---------------------------------------------------------------------------

/// Tracks referrals and pays out rewards.
#[derive(Clone)]
pub struct ReferralEngine {
    store: LedgerStore,
}

impl ReferralEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Counts a referral signup against the referrer.
    ///
    /// The submitted code must be the referrer's own — a mismatch means
    /// the caller is attributing a signup to the wrong account. Beyond
    /// the invite cap the count freezes and `limit_reached` reports it.
    pub fn record_referral(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
        referred_user_name: &str,
        referral_code: &str,
    ) -> LedgerResult<ReferralUpdate> {
        let referrer = self.store.get_account(referrer_id)?;
        if referrer.referral_code != referral_code {
            return Err(LedgerError::Validation(
                "referral code does not belong to this account".into(),
            ));
        }

        let updated = self.store.update_account(referrer_id, |account| {
            if account.total_referrals < REFERRAL_INVITE_CAP {
                account.total_referrals += 1;
            }
            Ok(())
        })?;

        // Link the referred account back, if it exists and isn't already
        // attributed.
        if let Ok(referred) = self.store.get_account(referred_user_id) {
            if referred.referred_by.is_none() {
                self.store.update_account(referred_user_id, |account| {
                    account.referred_by = Some(referrer_id.to_string());
                    Ok(())
                })?;
            }
        }

        let limit_reached = updated.total_referrals >= REFERRAL_INVITE_CAP;
        info!(
            referrer_id,
            referred_user_id,
            referred_user_name,
            total = updated.total_referrals,
            limit_reached,
            "referral recorded"
        );
        Ok(ReferralUpdate {
            new_total_referrals: updated.total_referrals,
            limit_reached,
        })
    }

    /// Current eligibility for the account.
    pub fn evaluate(&self, account_id: &str) -> LedgerResult<Eligibility> {
        let account = self.store.get_account(account_id)?;
        Ok(Eligibility {
            eligible: account.total_referrals >= REFERRAL_REQUIRED_COUNT,
            current_count: account.total_referrals,
            required_count: REFERRAL_REQUIRED_COUNT,
        })
    }

    /// Pays out a reward, once.
    ///
    /// The claim record is inserted first, under compare-and-swap; only
    /// the winning insert proceeds to credit. Everything runs under the
    /// account lock so the credit and the earnings counter stay consistent
    /// with concurrent balance operations.
    pub fn claim(&self, account_id: &str, reward: &RewardType) -> LedgerResult<Transaction> {
        let eligibility = self.evaluate(account_id)?;
        if !eligibility.eligible {
            return Err(LedgerError::NotEligible {
                current: eligibility.current_count,
                required: eligibility.required_count,
            });
        }
        // Price resolution can fail (unknown plan); do it before any write.
        let value = reward.value_kobo()?;

        self.store.with_account_lock(account_id, || {
            let claim = RewardClaim {
                account_id: account_id.to_string(),
                reward_tag: reward.tag().to_string(),
                details: format!("{} ({})", reward.description(), format_kobo(value)),
                claimed_at: Utc::now(),
            };
            if !self
                .store
                .db()
                .try_insert_claim(account_id, reward.tag(), &claim)?
            {
                warn!(account_id, reward = reward.tag(), "reward already claimed");
                return Err(LedgerError::AlreadyClaimed);
            }

            let mut account = self.store.get_account(account_id)?;
            account.balance = account
                .balance
                .checked_add(value)
                .ok_or_else(|| LedgerError::Validation("balance overflow".into()))?;
            account.referral_earnings = account.referral_earnings.saturating_add(value);
            self.store.db().put_account(&account)?;

            let mut tx = Transaction::settled(
                account_id,
                value,
                TransactionDetails::ReferralReward {
                    reward_type: reward.tag().to_string(),
                },
                None,
            );
            tx.note = Some(reward.description());
            self.store.db().put_transaction(&tx)?;

            info!(
                account_id,
                reward = reward.tag(),
                value,
                balance_after = account.balance,
                "referral reward paid"
            );
            Ok(tx)
        })
    }
}
