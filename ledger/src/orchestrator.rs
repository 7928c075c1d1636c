//! # Purchase Orchestrator
//!
//! Drives a service purchase end to end: validate, record `Pending`, call
//! the vend provider, and settle. One orchestrator handles every debit
//! kind — airtime, data, electricity, catalog products — parameterized by
//! the transaction details.
//!
//! ## Debit Discipline
//!
//! The wallet is debited only after the provider has explicitly confirmed
//! delivery. A rejection, an outage, or a timeout leaves the balance
//! untouched and finalizes the record `Failed`. An ambiguous outcome (the
//! call timed out mid-flight) is treated as not delivered — if the vendor
//! actually delivered, reconciliation against the provider ref catches it;
//! the ledger never guesses in the user's disfavor or its own.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::PROVIDER_TIMEOUT;
use crate::error::{LedgerError, LedgerResult};
use crate::provider::{ProviderOutcome, VendOrder, VendProvider};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionDetails, TransactionStatus};

/// Orchestrates purchases against a single vend provider.
#[derive(Clone)]
pub struct Orchestrator {
    store: LedgerStore,
    provider: Arc<dyn VendProvider>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(store: LedgerStore, provider: Arc<dyn VendProvider>) -> Self {
        Self {
            store,
            provider,
            timeout: PROVIDER_TIMEOUT,
        }
    }

    /// Overrides the provider deadline. Tests use this; production runs on
    /// the configured default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executes a purchase and returns the terminal transaction record.
    ///
    /// Provider-side failures are not `Err` — they come back as an `Ok`
    /// transaction in `Failed` status, because from the caller's view the
    /// purchase ran to a definitive outcome. `Err` is reserved for
    /// requests that never got off the ground: bad input, unknown
    /// account, insufficient balance (which records no transaction at
    /// all).
    pub async fn purchase(
        &self,
        account_id: &str,
        amount: u64,
        details: TransactionDetails,
    ) -> LedgerResult<Transaction> {
        if amount == 0 {
            return Err(LedgerError::Validation("amount must be > 0".into()));
        }
        if details.kind().is_credit() {
            return Err(LedgerError::Validation(format!(
                "{} is not a purchasable kind",
                details.kind()
            )));
        }

        // Balance gate before any record or external call. The debit after
        // confirmation re-checks atomically; this keeps obviously-doomed
        // requests from ever reaching the provider.
        let account = self.store.get_account(account_id)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: account.balance,
                requested: amount,
            });
        }

        let tx = Transaction::pending(account_id, amount, details);
        self.store.record_transaction(&tx)?;
        info!(
            internal_ref = %tx.internal_ref,
            account_id,
            kind = %tx.kind,
            amount,
            "purchase dispatched"
        );

        let order = VendOrder {
            internal_ref: tx.internal_ref.clone(),
            amount,
            details: tx.details.clone(),
        };
        let outcome = match tokio::time::timeout(self.timeout, self.provider.vend(&order)).await {
            Ok(outcome) => outcome,
            Err(_) => ProviderOutcome::Unavailable {
                reason: format!("provider call exceeded {:?}", self.timeout),
            },
        };

        match outcome {
            ProviderOutcome::Confirmed {
                provider_ref,
                detail,
            } => self.settle_confirmed(&tx, &provider_ref, &detail),
            ProviderOutcome::Rejected { reason } => {
                warn!(internal_ref = %tx.internal_ref, %reason, "provider rejected vend");
                self.store.finalize_transaction(
                    &tx.internal_ref,
                    TransactionStatus::Failed,
                    Some(LedgerError::ProviderRejected(reason).user_message()),
                    None,
                )
            }
            ProviderOutcome::Unavailable { reason } => {
                warn!(internal_ref = %tx.internal_ref, %reason, "provider unavailable");
                self.store.finalize_transaction(
                    &tx.internal_ref,
                    TransactionStatus::Failed,
                    Some(LedgerError::ProviderUnavailable(reason).user_message()),
                    None,
                )
            }
        }
    }

    /// Applies the debit for a confirmed delivery and finalizes.
    ///
    /// The debit can still lose a race against a concurrent spend. In that
    /// case the vendor has delivered but the wallet cannot pay — the
    /// record is finalized `Failed` and the discrepancy is raised at error
    /// level for reconciliation.
    fn settle_confirmed(
        &self,
        tx: &Transaction,
        provider_ref: &str,
        detail: &str,
    ) -> LedgerResult<Transaction> {
        // Claim the provider reference before moving money. A reference
        // that already settled another record means this confirmation
        // cannot be trusted — no debit, and the collision goes to the
        // logs.
        if !self
            .store
            .db()
            .try_claim_external_ref(provider_ref, &tx.internal_ref)?
        {
            error!(
                internal_ref = %tx.internal_ref,
                provider_ref,
                "provider reference already settled another record; vend not debited"
            );
            return self.store.finalize_transaction(
                &tx.internal_ref,
                TransactionStatus::Failed,
                Some("Purchase could not be completed. Please contact support.".to_string()),
                None,
            );
        }

        match self.store.debit(&tx.account_id, tx.amount) {
            Ok(account) => {
                info!(
                    internal_ref = %tx.internal_ref,
                    provider_ref,
                    balance_after = account.balance,
                    "purchase settled"
                );
                self.store.finalize_transaction(
                    &tx.internal_ref,
                    TransactionStatus::Success,
                    Some(detail.to_string()),
                    Some(provider_ref.to_string()),
                )
            }
            Err(LedgerError::InsufficientBalance {
                available,
                requested,
            }) => {
                error!(
                    internal_ref = %tx.internal_ref,
                    provider_ref,
                    available,
                    requested,
                    "delivery confirmed but debit failed; needs reconciliation"
                );
                self.store.finalize_transaction(
                    &tx.internal_ref,
                    TransactionStatus::Failed,
                    Some("Purchase could not be completed. Please contact support.".to_string()),
                    Some(provider_ref.to_string()),
                )
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::provider::StubProvider;
    use crate::transaction::TransactionKind;
    use async_trait::async_trait;

    fn store_with_balance(balance: u64) -> LedgerStore {
        let store = LedgerStore::in_memory().unwrap();
        let mut account = Account::new("acct_1", "Ada", "ada@example.com");
        account.balance = balance;
        store.db().put_account(&account).unwrap();
        store
    }

    fn airtime() -> TransactionDetails {
        TransactionDetails::Airtime {
            phone: "08031234567".into(),
            network: "mtn".into(),
        }
    }

    #[tokio::test]
    async fn confirmed_purchase_debits_and_settles() {
        let store = store_with_balance(100_000);
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(StubProvider::confirming()));

        let tx = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.kind, TransactionKind::Airtime);
        assert!(tx.external_ref.as_deref().unwrap().starts_with("stub-"));
        assert_eq!(store.get_account("acct_1").unwrap().balance, 70_000);
    }

    #[tokio::test]
    async fn rejected_purchase_leaves_balance_intact() {
        let store = store_with_balance(100_000);
        let raw_reason = "vendor float exhausted on MTN shard 3";
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StubProvider::rejecting(raw_reason)));

        let tx = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(store.get_account("acct_1").unwrap().balance, 100_000);
        // Raw provider text stays out of the record's user-facing note.
        assert!(!tx.note.as_deref().unwrap().contains("shard"));
    }

    #[tokio::test]
    async fn unavailable_provider_fails_without_debit() {
        let store = store_with_balance(100_000);
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(StubProvider::unavailable("connect timeout to 10.2.0.9")),
        );

        let tx = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(store.get_account("acct_1").unwrap().balance, 100_000);
        assert!(!tx.note.as_deref().unwrap().contains("10.2.0.9"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_is_ambiguous_and_never_debits() {
        let store = store_with_balance(100_000);
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(StubProvider::hanging(Duration::from_secs(300))),
        )
        .with_timeout(Duration::from_secs(5));

        let tx = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(store.get_account("acct_1").unwrap().balance, 100_000);
    }

    #[tokio::test]
    async fn insufficient_balance_records_nothing() {
        let store = store_with_balance(10_000);
        let provider = Arc::new(StubProvider::confirming());
        let orchestrator = Orchestrator::new(store.clone(), provider.clone());

        let result = orchestrator.purchase("acct_1", 30_000, airtime()).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert!(store.transactions_for_account("acct_1").unwrap().is_empty());
        // The provider was never contacted.
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn zero_amount_and_credit_kinds_rejected() {
        let store = store_with_balance(100_000);
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(StubProvider::confirming()));

        assert!(orchestrator.purchase("acct_1", 0, airtime()).await.is_err());

        let credit_details = TransactionDetails::TopUp {
            payer_email: "x@example.com".into(),
            currency: "NGN".into(),
        };
        assert!(orchestrator
            .purchase("acct_1", 1_000, credit_details)
            .await
            .is_err());
        assert!(store.transactions_for_account("acct_1").unwrap().is_empty());
    }

    /// Confirms delivery but drains the wallet first, staging the
    /// confirmed-but-unpayable race.
    struct DrainingProvider {
        store: LedgerStore,
    }

    #[async_trait]
    impl VendProvider for DrainingProvider {
        async fn vend(&self, order: &VendOrder) -> ProviderOutcome {
            let balance = self.store.get_account("acct_1").unwrap().balance;
            self.store.debit("acct_1", balance).unwrap();
            ProviderOutcome::Confirmed {
                provider_ref: format!("stub-{}", order.internal_ref),
                detail: "delivered".into(),
            }
        }
    }

    #[tokio::test]
    async fn lost_debit_race_finalizes_failed() {
        let store = store_with_balance(50_000);
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(DrainingProvider {
                store: store.clone(),
            }),
        );

        let tx = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        // Provider ref is kept on the failed record for reconciliation.
        assert!(tx.external_ref.is_some());
        assert_eq!(store.get_account("acct_1").unwrap().balance, 0);
    }

    /// Confirms delivery under a fixed provider reference.
    struct FixedRefProvider;

    #[async_trait]
    impl VendProvider for FixedRefProvider {
        async fn vend(&self, _order: &VendOrder) -> ProviderOutcome {
            ProviderOutcome::Confirmed {
                provider_ref: "prov-reused".into(),
                detail: "delivered".into(),
            }
        }
    }

    #[tokio::test]
    async fn colliding_provider_ref_fails_without_debit() {
        let store = store_with_balance(100_000);
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(FixedRefProvider));

        let first = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();
        assert_eq!(first.status, TransactionStatus::Success);
        assert_eq!(store.get_account("acct_1").unwrap().balance, 70_000);

        // The same reference cannot settle a second record, and the
        // wallet is not touched.
        let second = orchestrator.purchase("acct_1", 30_000, airtime()).await.unwrap();
        assert_eq!(second.status, TransactionStatus::Failed);
        assert_eq!(store.get_account("acct_1").unwrap().balance, 70_000);

        let settled = store.find_by_external_ref("prov-reused").unwrap().unwrap();
        assert_eq!(settled.internal_ref, first.internal_ref);
    }

    #[tokio::test]
    async fn every_dispatched_purchase_ends_terminal() {
        let store = store_with_balance(100_000);
        for provider in [
            StubProvider::confirming(),
            StubProvider::rejecting("no"),
            StubProvider::unavailable("down"),
        ] {
            let orchestrator = Orchestrator::new(store.clone(), Arc::new(provider));
            let tx = orchestrator.purchase("acct_1", 1_000, airtime()).await.unwrap();
            assert!(tx.status.is_terminal());
        }
    }
}
