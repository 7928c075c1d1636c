//! # Wallet REST API
//!
//! Builds the axum router that exposes the gateway's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Description                       |
//! |--------|-----------------------------|-----------------------------------|
//! | GET    | `/health`                   | Liveness probe                    |
//! | POST   | `/webhooks/payments`        | Payment-gateway event ingestion   |
//! | POST   | `/pin`                      | PIN actions (set/verify/status/reset) |
//! | POST   | `/purchases`                | Service purchase                  |
//! | POST   | `/referrals/track`          | Referral-count update             |
//! | GET    | `/referrals/:id`            | Referral reward eligibility       |
//! | POST   | `/referrals/:id/claim`      | Referral reward claim             |
//! | GET    | `/accounts/:id`             | Account state                     |
//! | GET    | `/accounts/:id/transactions`| Transaction history               |
//! | POST   | `/accounts`                 | Account creation                  |
//!
//! Every response body carries `success`, and failures add a sanitized
//! `error` string — provider internals and storage detail never leave the
//! logs.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kobo_ledger::account::Account;
use kobo_ledger::error::{LedgerError, LedgerResult};
use kobo_ledger::orchestrator::Orchestrator;
use kobo_ledger::pin::PinAuthority;
use kobo_ledger::referral::{ReferralEngine, RewardType};
use kobo_ledger::store::LedgerStore;
use kobo_ledger::transaction::{Transaction, TransactionDetails, TransactionKind, TransactionStatus};
use kobo_ledger::webhook::{PaymentEvent, WebhookIngestor, WebhookOutcome};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc` internally.
#[derive(Clone)]
pub struct AppState {
    /// The gateway's reported version string.
    pub version: String,
    /// Ledger store (accounts, transactions, credentials, claims).
    pub store: LedgerStore,
    /// Webhook ingestion component.
    pub ingestor: WebhookIngestor,
    /// Purchase orchestrator bound to the configured vend provider.
    pub orchestrator: Orchestrator,
    /// PIN credential authority.
    pub pin: PinAuthority,
    /// Referral tracking and reward payouts.
    pub referrals: ReferralEngine,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured API port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/payments", post(webhook_handler))
        .route("/pin", post(pin_handler))
        .route("/purchases", post(purchase_handler))
        .route("/referrals/track", post(referral_track_handler))
        .route("/referrals/:id", get(referral_status_handler))
        .route("/referrals/:id/claim", post(referral_claim_handler))
        .route("/accounts", post(create_account_handler))
        .route("/accounts/:id", get(account_handler))
        .route("/accounts/:id/transactions", get(transactions_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// `POST /pin` request. One endpoint, dispatched on `action`.
#[derive(Debug, Deserialize)]
pub struct PinRequest {
    /// One of `set_pin`, `verify_pin`, `check_pin_status`, `reset_pin`.
    pub action: String,
    /// Account the action applies to.
    pub user_id: String,
    /// New PIN (`set_pin`) or submitted PIN (`verify_pin`).
    pub pin: Option<String>,
    /// Current PIN when changing an existing one.
    pub current_pin: Option<String>,
    /// Administrative account requesting a `reset_pin`.
    pub requested_by: Option<String>,
}

/// `POST /purchases` request.
///
/// The kind selects which of the optional fields are required; the
/// handler assembles them into the kind's details payload and rejects
/// incomplete combinations.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: String,
    pub kind: TransactionKind,
    /// Purchase amount in kobo.
    pub amount: u64,
    /// Transaction PIN. Required once the account has a credential.
    pub pin: Option<String>,
    pub phone: Option<String>,
    pub network: Option<String>,
    pub plan_id: Option<String>,
    pub meter_number: Option<String>,
    pub disco: Option<String>,
    pub item_id: Option<String>,
    pub quantity: Option<u32>,
}

/// `POST /referrals/track` request.
#[derive(Debug, Deserialize)]
pub struct ReferralTrackRequest {
    pub referrer_id: String,
    pub referred_user_id: String,
    pub referred_user_name: String,
    pub referral_code: String,
}

/// `POST /referrals/:id/claim` request.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Tagged reward selector, e.g. `{"type": "cash"}` or
    /// `{"type": "data", "plan_id": "data-1gb-30d"}`.
    pub reward: RewardType,
}

/// `POST /accounts` request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Caller-chosen account id. Generated when omitted.
    pub user_id: Option<String>,
    pub display_name: String,
    pub email: String,
}

/// Account state as served to clients. The balance here is the
/// server-authoritative number — clients never compute balances.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: String,
    pub display_name: String,
    pub email: String,
    /// Balance in kobo.
    pub balance: u64,
    /// Balance rendered for display.
    pub balance_display: String,
    pub referral_code: String,
    pub total_referrals: u32,
    /// Lifetime referral earnings in kobo.
    pub referral_earnings: u64,
    /// Client reference for the virtual funding account.
    pub funding_ref: String,
    pub created_at: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            balance_display: account.balance_display(),
            id: account.id,
            display_name: account.display_name,
            email: account.email,
            balance: account.balance,
            referral_code: account.referral_code,
            total_referrals: account.total_referrals,
            referral_earnings: account.referral_earnings,
            funding_ref: account.funding_ref,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Purchase outcome as served to clients. A terminally failed purchase is
/// still a 200 — the request ran to a definitive outcome and this body is
/// that outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub success: bool,
    /// Internal transaction reference.
    pub reference: String,
    /// Terminal status: `success` or `failed`.
    pub status: TransactionStatus,
    /// Sanitized outcome note.
    pub message: Option<String>,
}

/// Generic error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Maps the ledger error taxonomy onto HTTP statuses.
fn error_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::WrongPin { .. } => StatusCode::UNAUTHORIZED,
        LedgerError::Locked { .. } => StatusCode::LOCKED,
        LedgerError::AuthenticationMismatch => StatusCode::FORBIDDEN,
        LedgerError::AlreadyClaimed => StatusCode::CONFLICT,
        LedgerError::NotEligible { .. } => StatusCode::CONFLICT,
        // Acknowledged upstream before reaching this mapping; kept total.
        LedgerError::DuplicateEvent(_) => StatusCode::OK,
        LedgerError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders an error as `(status, {success:false, error})`. Storage detail
/// is logged here and replaced with the sanitized category message.
fn error_response(err: LedgerError) -> Response {
    if matches!(err, LedgerError::Storage(_)) {
        tracing::error!(error = %err, "request failed on storage");
    }
    let body = ErrorResponse {
        success: false,
        error: err.user_message(),
    };
    (error_status(&err), Json(body)).into_response()
}

/// `Result` adapter so handlers can use `?` and still produce a response.
fn respond<T: Serialize>(result: LedgerResult<T>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the gateway is alive, plus the running
/// version.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
/// It intentionally does not touch the database.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "version": state.version })),
    )
}

/// `POST /webhooks/payments` — payment-gateway event ingestion.
///
/// Every acknowledged outcome (credited, duplicate, ignored) returns 200
/// so the provider stops retrying. Resolution failures return an error
/// status so the provider retries later.
async fn webhook_handler(
    State(state): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> Response {
    match state.ingestor.ingest(&event) {
        Ok(WebhookOutcome::Credited {
            transaction,
            balance_after,
            ..
        }) => {
            state.metrics.webhook_credited_total.inc();
            Json(serde_json::json!({
                "success": true,
                "status": "credited",
                "reference": transaction.internal_ref,
                "amount_kobo": transaction.amount,
                "balance_kobo": balance_after,
            }))
            .into_response()
        }
        Ok(WebhookOutcome::Duplicate { external_ref }) => {
            state.metrics.webhook_duplicate_total.inc();
            Json(serde_json::json!({
                "success": true,
                "status": "duplicate",
                "external_ref": external_ref,
            }))
            .into_response()
        }
        Ok(WebhookOutcome::Ignored { reason }) => {
            state.metrics.webhook_ignored_total.inc();
            Json(serde_json::json!({
                "success": true,
                "status": "ignored",
                "reason": reason,
            }))
            .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /pin` — action-dispatched PIN operations.
async fn pin_handler(State(state): State<AppState>, Json(req): Json<PinRequest>) -> Response {
    match req.action.as_str() {
        "set_pin" => {
            let pin = match require(req.pin.as_deref(), "pin") {
                Ok(p) => p,
                Err(err) => return error_response(err),
            };
            respond(
                state
                    .pin
                    .set_pin(&req.user_id, pin, req.current_pin.as_deref())
                    .map(|_| serde_json::json!({ "success": true, "message": "PIN set" })),
            )
        }
        "verify_pin" => {
            let pin = match require(req.pin.as_deref(), "pin") {
                Ok(p) => p,
                Err(err) => return error_response(err),
            };
            match state.pin.verify(&req.user_id, pin) {
                Ok(()) => Json(serde_json::json!({ "success": true, "valid": true }))
                    .into_response(),
                Err(err) => {
                    if matches!(err, LedgerError::Locked { .. }) {
                        state.metrics.pin_lockouts_total.inc();
                    }
                    error_response(err)
                }
            }
        }
        "check_pin_status" => respond(state.pin.status(&req.user_id).map(|status| {
            serde_json::json!({
                "success": true,
                "has_pin": status.has_pin,
                "is_locked": status.is_locked,
                "locked_until": status.locked_until,
            })
        })),
        "reset_pin" => {
            let requested_by = match require(req.requested_by.as_deref(), "requested_by") {
                Ok(r) => r,
                Err(err) => return error_response(err),
            };
            respond(
                state
                    .pin
                    .reset(&req.user_id, requested_by)
                    .map(|_| serde_json::json!({ "success": true, "message": "PIN reset" })),
            )
        }
        other => error_response(LedgerError::Validation(format!("unknown action {other}"))),
    }
}

/// `POST /purchases` — executes a service purchase.
///
/// Applies the PIN gate when the account has a credential, then hands off
/// to the orchestrator. The provider call is timed into the latency
/// histogram regardless of outcome.
async fn purchase_handler(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    let details = match build_details(&req) {
        Ok(details) => details,
        Err(err) => return error_response(err),
    };

    // PIN gate: enforced once a credential exists.
    match state.pin.status(&req.user_id) {
        Ok(status) if status.has_pin => {
            let pin = match require(req.pin.as_deref(), "pin") {
                Ok(p) => p,
                Err(err) => return error_response(err),
            };
            if let Err(err) = state.pin.verify(&req.user_id, pin) {
                if matches!(err, LedgerError::Locked { .. }) {
                    state.metrics.pin_lockouts_total.inc();
                }
                return error_response(err);
            }
        }
        Ok(_) => {}
        Err(err) => return error_response(err),
    }

    let timer = state.metrics.provider_latency_seconds.start_timer();
    let result = state
        .orchestrator
        .purchase(&req.user_id, req.amount, details)
        .await;
    timer.observe_duration();

    match result {
        Ok(tx) => {
            match tx.status {
                TransactionStatus::Success => state.metrics.purchases_success_total.inc(),
                _ => state.metrics.purchases_failed_total.inc(),
            }
            let body = PurchaseResponse {
                success: tx.status == TransactionStatus::Success,
                reference: tx.internal_ref,
                status: tx.status,
                message: tx.note,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /referrals/track` — counts a referral signup.
async fn referral_track_handler(
    State(state): State<AppState>,
    Json(req): Json<ReferralTrackRequest>,
) -> Response {
    respond(
        state
            .referrals
            .record_referral(
                &req.referrer_id,
                &req.referred_user_id,
                &req.referred_user_name,
                &req.referral_code,
            )
            .map(|update| {
                serde_json::json!({
                    "success": true,
                    "new_total_referrals": update.new_total_referrals,
                    "limit_reached": update.limit_reached,
                })
            }),
    )
}

/// `GET /referrals/:id` — reward eligibility for the account.
async fn referral_status_handler(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    respond(state.referrals.evaluate(&account_id).map(|eligibility| {
        serde_json::json!({
            "success": true,
            "eligible": eligibility.eligible,
            "current_count": eligibility.current_count,
            "required_count": eligibility.required_count,
        })
    }))
}

/// `POST /referrals/:id/claim` — pays out a reward, once.
async fn referral_claim_handler(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    respond(state.referrals.claim(&account_id, &req.reward).map(|tx| {
        serde_json::json!({
            "success": true,
            "reference": tx.internal_ref,
            "amount_kobo": tx.amount,
        })
    }))
}

/// `POST /accounts` — creates a wallet account.
async fn create_account_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Response {
    if req.display_name.trim().is_empty() || !req.email.contains('@') {
        return error_response(LedgerError::Validation(
            "display_name and a valid email are required".into(),
        ));
    }
    let id = req
        .user_id
        .unwrap_or_else(|| format!("acct_{}", uuid::Uuid::new_v4().simple()));

    match state
        .store
        .create_account(Account::new(&id, req.display_name.trim(), req.email.trim()))
    {
        Ok(account) => {
            state
                .metrics
                .accounts
                .set(state.store.db().account_count() as i64);
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "success": true,
                    "account": AccountResponse::from(account),
                })),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `GET /accounts/:id` — server-authoritative account state.
async fn account_handler(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    respond(
        state
            .store
            .get_account(&account_id)
            .map(AccountResponse::from),
    )
}

/// `GET /accounts/:id/transactions` — transaction history, newest last.
async fn transactions_handler(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    // Existence check so unknown accounts 404 instead of listing empty.
    if let Err(err) = state.store.get_account(&account_id) {
        return error_response(err);
    }
    respond(
        state
            .store
            .transactions_for_account(&account_id)
            .map(|mut txs: Vec<Transaction>| {
                txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                serde_json::json!({ "success": true, "transactions": txs })
            }),
    )
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Required-field extraction for action-style requests.
fn require<'a>(field: Option<&'a str>, name: &str) -> LedgerResult<&'a str> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::Validation(format!("{name} is required")))
}

/// Assembles the kind-specific details payload from the flat request.
fn build_details(req: &PurchaseRequest) -> LedgerResult<TransactionDetails> {
    let details = match req.kind {
        TransactionKind::Airtime => TransactionDetails::Airtime {
            phone: require(req.phone.as_deref(), "phone")?.to_string(),
            network: require(req.network.as_deref(), "network")?.to_string(),
        },
        TransactionKind::Data => TransactionDetails::Data {
            phone: require(req.phone.as_deref(), "phone")?.to_string(),
            network: require(req.network.as_deref(), "network")?.to_string(),
            plan_id: require(req.plan_id.as_deref(), "plan_id")?.to_string(),
        },
        TransactionKind::Electricity => TransactionDetails::Electricity {
            meter_number: require(req.meter_number.as_deref(), "meter_number")?.to_string(),
            disco: require(req.disco.as_deref(), "disco")?.to_string(),
        },
        TransactionKind::ProductPurchase => TransactionDetails::ProductPurchase {
            item_id: require(req.item_id.as_deref(), "item_id")?.to_string(),
            quantity: req.quantity.unwrap_or(1),
        },
        TransactionKind::TopUp | TransactionKind::ReferralReward => {
            return Err(LedgerError::Validation(format!(
                "{} is not a purchasable kind",
                req.kind
            )))
        }
    };
    Ok(details)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
