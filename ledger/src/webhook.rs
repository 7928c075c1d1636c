//! # Payment Webhook Ingestion
//!
//! Turns inbound payment-gateway events into wallet credits, exactly once.
//! The provider retries delivery until it sees a success acknowledgement,
//! so every outcome here is classified as either "acknowledge and stop"
//! (credited, duplicate, ignored) or "fail so the provider retries"
//! (unresolvable account, storage trouble).
//!
//! The idempotency anchor is the provider's `flw_ref`: it is attached to
//! the credit transaction under a compare-and-swap, so a replayed event —
//! same ref — can never produce a second credit no matter how the replay
//! races the original.
//!
//! Amounts arrive as decimal currency units and are converted to kobo
//! exactly once, here. Everything past this boundary is integer kobo.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionDetails};

// ---------------------------------------------------------------------------
// Event payload
// ---------------------------------------------------------------------------

/// Event type we act on. Everything else is acknowledged and ignored.
const EVENT_CHARGE_COMPLETED: &str = "charge.completed";
/// Status that marks a settled charge.
const STATUS_SUCCESSFUL: &str = "successful";
/// Payment type for inbound virtual-account transfers.
const PAYMENT_TYPE_BANK_TRANSFER: &str = "bank_transfer";

/// Inbound webhook payload, as posted by the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Event name, e.g. `charge.completed`.
    pub event: String,
    pub data: PaymentData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentData {
    /// Charge status, e.g. `successful`.
    pub status: String,
    /// Payment channel, e.g. `bank_transfer`.
    pub payment_type: String,
    /// Amount in decimal currency units (NGN). Converted to kobo once.
    pub amount: f64,
    /// ISO currency code reported by the gateway.
    pub currency: String,
    /// Our client reference for the virtual funding account, echoed back.
    #[serde(default)]
    pub tx_ref: Option<String>,
    /// The gateway's unique reference for this charge.
    pub flw_ref: String,
    pub customer: PaymentCustomer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCustomer {
    /// Payer email on the gateway's records.
    #[serde(default)]
    pub email: Option<String>,
}

/// What ingestion did with an event. All three variants are acknowledged
/// to the provider as success.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Not an event we act on. Acknowledged so the provider stops sending it.
    Ignored {
        reason: String,
    },
    /// Already credited under this external reference. No mutation.
    Duplicate {
        external_ref: String,
    },
    /// Wallet credited and a `Success` top-up transaction recorded.
    Credited {
        transaction: Transaction,
        balance_before: u64,
        balance_after: u64,
    },
}

// ---------------------------------------------------------------------------
// WebhookIngestor
// ---------------------------------------------------------------------------

/// Processes payment-gateway webhook events against the ledger.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: LedgerStore,
}

impl WebhookIngestor {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Ingests one event. See the module docs for the outcome taxonomy.
    pub fn ingest(&self, event: &PaymentEvent) -> LedgerResult<WebhookOutcome> {
        if let Some(reason) = classify_ignorable(event) {
            info!(flw_ref = %event.data.flw_ref, %reason, "webhook event ignored");
            return Ok(WebhookOutcome::Ignored { reason });
        }

        let external_ref = event.data.flw_ref.clone();
        let amount_kobo = decimal_to_kobo(event.data.amount)?;

        // Fast duplicate path. The CAS inside the credit catches the race
        // this check can miss.
        if self.store.find_by_external_ref(&external_ref)?.is_some() {
            info!(flw_ref = %external_ref, "webhook replay, already settled");
            return Ok(WebhookOutcome::Duplicate { external_ref });
        }

        let payer_email = event
            .data
            .customer
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| LedgerError::Validation("event carries no payer email".into()))?;

        let account = self.resolve_account(event.data.tx_ref.as_deref(), &payer_email)?;

        let details = TransactionDetails::TopUp {
            payer_email: payer_email.clone(),
            currency: event.data.currency.clone(),
        };
        let (transaction, balance_before, balance_after) = match self
            .store
            .credit_with_external_ref(&account.id, amount_kobo, &external_ref, details)
        {
            Ok(result) => result,
            Err(e) if e.is_idempotent_noop() => {
                info!(flw_ref = %external_ref, "webhook replay lost the settle race");
                return Ok(WebhookOutcome::Duplicate { external_ref });
            }
            Err(e) => return Err(e),
        };

        info!(
            account_id = %account.id,
            flw_ref = %external_ref,
            internal_ref = %transaction.internal_ref,
            amount_kobo,
            balance_before,
            balance_after,
            "wallet credited from webhook"
        );

        Ok(WebhookOutcome::Credited {
            transaction,
            balance_before,
            balance_after,
        })
    }

    /// Resolves the destination account: by funding reference first, then
    /// by payer email. A funding-ref hit whose email does not match the
    /// payer is a hard failure — that event is describing someone else's
    /// money.
    fn resolve_account(
        &self,
        tx_ref: Option<&str>,
        payer_email: &str,
    ) -> LedgerResult<crate::account::Account> {
        if let Some(tx_ref) = tx_ref {
            if let Some(account) = self.store.account_by_funding_ref(tx_ref)? {
                if normalize_email(&account.email) != payer_email {
                    warn!(
                        account_id = %account.id,
                        tx_ref,
                        "webhook payer email does not match account on record"
                    );
                    return Err(LedgerError::AuthenticationMismatch);
                }
                return Ok(account);
            }
            warn!(tx_ref, "webhook tx_ref resolved no account, trying email");
        }

        self.store
            .account_by_email(payer_email)?
            .ok_or_else(|| LedgerError::NotFound(format!("no account for payer {payer_email}")))
    }
}

/// `Some(reason)` when the event is not a settled inbound bank transfer.
fn classify_ignorable(event: &PaymentEvent) -> Option<String> {
    if event.event != EVENT_CHARGE_COMPLETED {
        return Some(format!("unhandled event type {}", event.event));
    }
    if event.data.status != STATUS_SUCCESSFUL {
        return Some(format!("non-successful status {}", event.data.status));
    }
    if event.data.payment_type != PAYMENT_TYPE_BANK_TRANSFER {
        return Some(format!("unhandled payment type {}", event.data.payment_type));
    }
    None
}

/// Converts a decimal currency amount to integer kobo. The only place in
/// the crate floating point touches money.
fn decimal_to_kobo(amount: f64) -> LedgerResult<u64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::Validation(format!(
            "invalid event amount {amount}"
        )));
    }
    let kobo = (amount * 100.0).round();
    if kobo > u64::MAX as f64 {
        return Err(LedgerError::Validation(format!(
            "event amount {amount} out of range"
        )));
    }
    Ok(kobo as u64)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::transaction::{TransactionKind, TransactionStatus};

    fn ingestor_with_account() -> (WebhookIngestor, LedgerStore, Account) {
        let store = LedgerStore::in_memory().unwrap();
        let account = store
            .create_account(Account::new("acct_1", "Ada", "ada@example.com"))
            .unwrap();
        (WebhookIngestor::new(store.clone()), store, account)
    }

    fn event(tx_ref: Option<&str>, flw_ref: &str, email: &str, amount: f64) -> PaymentEvent {
        PaymentEvent {
            event: EVENT_CHARGE_COMPLETED.into(),
            data: PaymentData {
                status: STATUS_SUCCESSFUL.into(),
                payment_type: PAYMENT_TYPE_BANK_TRANSFER.into(),
                amount,
                currency: "NGN".into(),
                tx_ref: tx_ref.map(str::to_string),
                flw_ref: flw_ref.into(),
                customer: PaymentCustomer {
                    email: Some(email.into()),
                },
            },
        }
    }

    #[test]
    fn settled_transfer_credits_once() {
        let (ingestor, store, account) = ingestor_with_account();
        let event = event(
            Some(&account.funding_ref),
            "flw-1001",
            "ada@example.com",
            2_500.75,
        );

        let outcome = ingestor.ingest(&event).unwrap();
        match outcome {
            WebhookOutcome::Credited {
                transaction,
                balance_before,
                balance_after,
            } => {
                assert_eq!(balance_before, 0);
                assert_eq!(balance_after, 250_075);
                assert_eq!(transaction.kind, TransactionKind::TopUp);
                assert_eq!(transaction.status, TransactionStatus::Success);
                assert_eq!(transaction.external_ref.as_deref(), Some("flw-1001"));
            }
            other => panic!("expected credit, got {other:?}"),
        }
        assert_eq!(store.get_account("acct_1").unwrap().balance, 250_075);
    }

    #[test]
    fn replayed_event_is_duplicate_not_double_credit() {
        let (ingestor, store, account) = ingestor_with_account();
        let event = event(
            Some(&account.funding_ref),
            "flw-1001",
            "ada@example.com",
            100.0,
        );

        ingestor.ingest(&event).unwrap();
        for _ in 0..3 {
            let outcome = ingestor.ingest(&event).unwrap();
            assert!(matches!(outcome, WebhookOutcome::Duplicate { ref external_ref }
                if external_ref == "flw-1001"));
        }

        assert_eq!(store.get_account("acct_1").unwrap().balance, 10_000);
        assert_eq!(store.transactions_for_account("acct_1").unwrap().len(), 1);
    }

    #[test]
    fn non_actionable_events_are_ignored_without_mutation() {
        let (ingestor, store, account) = ingestor_with_account();

        let mut wrong_event = event(Some(&account.funding_ref), "flw-2", "ada@example.com", 50.0);
        wrong_event.event = "charge.dispute".into();
        assert!(matches!(
            ingestor.ingest(&wrong_event).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        let mut failed = event(Some(&account.funding_ref), "flw-3", "ada@example.com", 50.0);
        failed.data.status = "failed".into();
        assert!(matches!(
            ingestor.ingest(&failed).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        let mut card = event(Some(&account.funding_ref), "flw-4", "ada@example.com", 50.0);
        card.data.payment_type = "card".into();
        assert!(matches!(
            ingestor.ingest(&card).unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        assert_eq!(store.get_account("acct_1").unwrap().balance, 0);
    }

    #[test]
    fn payer_email_mismatch_never_credits() {
        let (ingestor, store, account) = ingestor_with_account();
        let event = event(
            Some(&account.funding_ref),
            "flw-5",
            "mallory@example.com",
            500.0,
        );

        assert!(matches!(
            ingestor.ingest(&event),
            Err(LedgerError::AuthenticationMismatch)
        ));
        assert_eq!(store.get_account("acct_1").unwrap().balance, 0);
        assert!(store.find_by_external_ref("flw-5").unwrap().is_none());
    }

    #[test]
    fn email_comparison_is_case_insensitive() {
        let (ingestor, _, account) = ingestor_with_account();
        let event = event(
            Some(&account.funding_ref),
            "flw-6",
            "  ADA@Example.COM ",
            10.0,
        );
        assert!(matches!(
            ingestor.ingest(&event).unwrap(),
            WebhookOutcome::Credited { .. }
        ));
    }

    #[test]
    fn unknown_tx_ref_falls_back_to_email() {
        let (ingestor, store, _) = ingestor_with_account();
        let event = event(Some("kobo-fund-nobody-ffff"), "flw-7", "ada@example.com", 20.0);

        assert!(matches!(
            ingestor.ingest(&event).unwrap(),
            WebhookOutcome::Credited { .. }
        ));
        assert_eq!(store.get_account("acct_1").unwrap().balance, 2_000);
    }

    #[test]
    fn unresolvable_event_errors_for_retry() {
        let (ingestor, _, _) = ingestor_with_account();
        let event = event(None, "flw-8", "stranger@example.com", 20.0);
        assert!(matches!(
            ingestor.ingest(&event),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn missing_email_is_rejected() {
        let (ingestor, _, account) = ingestor_with_account();
        let mut event = event(Some(&account.funding_ref), "flw-9", "x", 20.0);
        event.data.customer.email = None;
        assert!(matches!(
            ingestor.ingest(&event),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn decimal_conversion_happens_once_and_exactly() {
        assert_eq!(decimal_to_kobo(2_500.75).unwrap(), 250_075);
        assert_eq!(decimal_to_kobo(0.01).unwrap(), 1);
        assert_eq!(decimal_to_kobo(1.0).unwrap(), 100);
        assert!(decimal_to_kobo(0.0).is_err());
        assert!(decimal_to_kobo(-5.0).is_err());
        assert!(decimal_to_kobo(f64::NAN).is_err());
        assert!(decimal_to_kobo(f64::INFINITY).is_err());
    }

    #[test]
    fn payload_deserializes_from_gateway_json() {
        let raw = r#"{
            "event": "charge.completed",
            "data": {
                "status": "successful",
                "payment_type": "bank_transfer",
                "amount": 150.5,
                "currency": "NGN",
                "tx_ref": "kobo-fund-acct_1-abc",
                "flw_ref": "FLW-MOCK-9921",
                "customer": {"email": "ada@example.com"}
            }
        }"#;
        let event: PaymentEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.data.flw_ref, "FLW-MOCK-9921");
        assert_eq!(event.data.tx_ref.as_deref(), Some("kobo-fund-acct_1-abc"));
        assert_eq!(decimal_to_kobo(event.data.amount).unwrap(), 15_050);
    }
}
