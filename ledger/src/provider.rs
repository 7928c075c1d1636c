//! # Vend Provider Seam
//!
//! The orchestrator talks to external fulfilment vendors (airtime, data,
//! electricity, products) through the [`VendProvider`] trait. Concrete
//! gateway deployments plug in real HTTP clients; tests plug in
//! [`StubProvider`].
//!
//! The contract is deliberately narrow: a provider returns exactly one
//! [`ProviderOutcome`], classified at the provider boundary. Anything the
//! orchestrator cannot read as an explicit confirmation is treated as not
//! delivered.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::transaction::TransactionDetails;

/// A fulfilment request handed to a provider.
#[derive(Debug, Clone)]
pub struct VendOrder {
    /// Internal transaction reference; providers echo it for reconciliation.
    pub internal_ref: String,
    /// Amount in kobo.
    pub amount: u64,
    /// What to deliver.
    pub details: TransactionDetails,
}

/// The one classification of a provider call. There is no "maybe" variant:
/// timeouts and transport failures are `Unavailable`, and `Unavailable`
/// never debits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// The provider explicitly confirmed delivery.
    Confirmed {
        /// Provider-assigned reference for the delivery.
        provider_ref: String,
        /// Human-readable delivery detail (token, bundle name).
        detail: String,
    },
    /// The provider explicitly declined.
    Rejected {
        /// Raw provider reason. Logged, never shown to users.
        reason: String,
    },
    /// No definitive answer: transport error, 5xx, or timeout.
    Unavailable {
        /// Raw failure description. Logged, never shown to users.
        reason: String,
    },
}

/// An external fulfilment vendor.
#[async_trait]
pub trait VendProvider: Send + Sync {
    /// Attempts the vend. Implementations classify their own transport and
    /// response handling into a [`ProviderOutcome`]; they do not return
    /// errors.
    async fn vend(&self, order: &VendOrder) -> ProviderOutcome;
}

// ---------------------------------------------------------------------------
// StubProvider
// ---------------------------------------------------------------------------

/// Scripted provider for tests and local runs.
#[derive(Debug, Clone)]
pub struct StubProvider {
    mode: StubMode,
    calls: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
enum StubMode {
    Confirm,
    Reject(String),
    Unavailable(String),
    /// Alternates confirm / reject per call. Devnet chaos dial.
    Flaky,
    /// Sleeps longer than any sane timeout before confirming. Used to
    /// exercise the orchestrator's deadline handling.
    Hang(Duration),
}

impl StubProvider {
    /// Confirms every order with a deterministic provider reference.
    pub fn confirming() -> Self {
        Self::with_mode(StubMode::Confirm)
    }

    /// Rejects every order with the given reason.
    pub fn rejecting(reason: &str) -> Self {
        Self::with_mode(StubMode::Reject(reason.to_string()))
    }

    /// Reports unavailability for every order.
    pub fn unavailable(reason: &str) -> Self {
        Self::with_mode(StubMode::Unavailable(reason.to_string()))
    }

    /// Alternates between confirming and rejecting, starting with confirm.
    pub fn flaky() -> Self {
        Self::with_mode(StubMode::Flaky)
    }

    /// Sleeps for `delay` before confirming.
    pub fn hanging(delay: Duration) -> Self {
        Self::with_mode(StubMode::Hang(delay))
    }

    fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many vend calls this stub has received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendProvider for StubProvider {
    async fn vend(&self, order: &VendOrder) -> ProviderOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            StubMode::Confirm => ProviderOutcome::Confirmed {
                provider_ref: format!("stub-{}", order.internal_ref),
                detail: "delivered".to_string(),
            },
            StubMode::Reject(reason) => ProviderOutcome::Rejected {
                reason: reason.clone(),
            },
            StubMode::Unavailable(reason) => ProviderOutcome::Unavailable {
                reason: reason.clone(),
            },
            StubMode::Flaky => {
                if call % 2 == 0 {
                    ProviderOutcome::Confirmed {
                        provider_ref: format!("stub-{}", order.internal_ref),
                        detail: "delivered".to_string(),
                    }
                } else {
                    ProviderOutcome::Rejected {
                        reason: "flaky stub says no this time".to_string(),
                    }
                }
            }
            StubMode::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                ProviderOutcome::Confirmed {
                    provider_ref: format!("stub-{}", order.internal_ref),
                    detail: "delivered late".to_string(),
                }
            }
        }
    }
}
