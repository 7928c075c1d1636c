//! # Prometheus Metrics
//!
//! Operational metrics for the wallet gateway, scraped at the `/metrics`
//! HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the gateway.
///
/// Clone-friendly (prometheus handles wrap `Arc` internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Webhook events acknowledged without action.
    pub webhook_ignored_total: IntCounter,
    /// Webhook events recognized as replays of settled credits.
    pub webhook_duplicate_total: IntCounter,
    /// Webhook events that credited a wallet.
    pub webhook_credited_total: IntCounter,
    /// Purchases that settled `success`.
    pub purchases_success_total: IntCounter,
    /// Purchases that settled `failed`.
    pub purchases_failed_total: IntCounter,
    /// PIN credentials locked by consecutive failures.
    pub pin_lockouts_total: IntCounter,
    /// Registered wallet accounts.
    pub accounts: IntGauge,
    /// Histogram of vend-provider call latency in seconds. Includes the
    /// timeout bound, hence the generous upper buckets.
    pub provider_latency_seconds: Histogram,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("kobo".into()), None)
            .expect("failed to create prometheus registry");

        let webhook_ignored_total = IntCounter::new(
            "webhook_ignored_total",
            "Webhook events acknowledged without action",
        )
        .expect("metric creation");
        registry
            .register(Box::new(webhook_ignored_total.clone()))
            .expect("metric registration");

        let webhook_duplicate_total = IntCounter::new(
            "webhook_duplicate_total",
            "Webhook events recognized as replays of settled credits",
        )
        .expect("metric creation");
        registry
            .register(Box::new(webhook_duplicate_total.clone()))
            .expect("metric registration");

        let webhook_credited_total = IntCounter::new(
            "webhook_credited_total",
            "Webhook events that credited a wallet",
        )
        .expect("metric creation");
        registry
            .register(Box::new(webhook_credited_total.clone()))
            .expect("metric registration");

        let purchases_success_total = IntCounter::new(
            "purchases_success_total",
            "Purchases that settled in success status",
        )
        .expect("metric creation");
        registry
            .register(Box::new(purchases_success_total.clone()))
            .expect("metric registration");

        let purchases_failed_total = IntCounter::new(
            "purchases_failed_total",
            "Purchases that settled in failed status",
        )
        .expect("metric creation");
        registry
            .register(Box::new(purchases_failed_total.clone()))
            .expect("metric registration");

        let pin_lockouts_total = IntCounter::new(
            "pin_lockouts_total",
            "PIN credentials locked by consecutive failed verifications",
        )
        .expect("metric creation");
        registry
            .register(Box::new(pin_lockouts_total.clone()))
            .expect("metric registration");

        let accounts = IntGauge::new("accounts", "Registered wallet accounts")
            .expect("metric creation");
        registry
            .register(Box::new(accounts.clone()))
            .expect("metric registration");

        let provider_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "provider_latency_seconds",
                "Vend-provider call latency in seconds",
            )
            .buckets(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(provider_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            webhook_ignored_total,
            webhook_duplicate_total,
            webhook_credited_total,
            purchases_success_total,
            purchases_failed_total,
            pin_lockouts_total,
            accounts,
            provider_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
