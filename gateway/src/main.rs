// Copyright (c) 2026 Kobo Payments. MIT License.
// See LICENSE for details.

//! # Kobo Wallet Gateway
//!
//! Entry point for the `kobo-gateway` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger database, and serves
//! the wallet HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the gateway
//! - `init`    — initialize the data directory and seed the admin account
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use kobo_ledger::account::Account;
use kobo_ledger::orchestrator::Orchestrator;
use kobo_ledger::pin::PinAuthority;
use kobo_ledger::provider::{StubProvider, VendProvider};
use kobo_ledger::referral::ReferralEngine;
use kobo_ledger::store::{LedgerDb, LedgerStore};
use kobo_ledger::webhook::WebhookIngestor;

use cli::{Commands, KoboGatewayCli};
use logging::LogFormat;
use metrics::GatewayMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KoboGatewayCli::parse();

    match cli.command {
        Commands::Run(args) => run_gateway(args).await,
        Commands::Init(args) => init_gateway(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full gateway: wallet API server and metrics endpoint.
async fn run_gateway(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        &args.log_level,
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        provider_mode = %args.provider_mode,
        "starting kobo-gateway"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = Arc::new(
        LedgerDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "database opened");

    let store = LedgerStore::new(db);

    // --- Metrics ---
    let gateway_metrics = Arc::new(GatewayMetrics::new());
    gateway_metrics
        .accounts
        .set(store.db().account_count() as i64);

    // --- Vend provider ---
    let provider = build_provider(&args.provider_mode);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (ledger {})",
            env!("CARGO_PKG_VERSION"),
            kobo_ledger::config::LEDGER_VERSION,
        ),
        ingestor: WebhookIngestor::new(store.clone()),
        orchestrator: Orchestrator::new(store.clone(), provider),
        pin: PinAuthority::new(store.clone()),
        referrals: ReferralEngine::new(store.clone()),
        store,
        metrics: Arc::clone(&gateway_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("wallet API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("kobo-gateway stopped");
    Ok(())
}

/// Selects the devnet provider stub for the configured mode.
fn build_provider(mode: &str) -> Arc<dyn VendProvider> {
    let stub = match mode {
        "reject" => StubProvider::rejecting("stub provider running in reject mode"),
        "unavailable" => StubProvider::unavailable("stub provider running in unavailable mode"),
        "flaky" => StubProvider::flaky(),
        _ => StubProvider::confirming(),
    };
    Arc::new(stub)
}

/// Initializes the data directory and seeds the administrative account.
///
/// Idempotent — rerunning against an initialized directory leaves the
/// existing admin in place.
fn init_gateway(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("kobo_gateway=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing gateway");

    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = Arc::new(
        LedgerDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    let store = LedgerStore::new(Arc::clone(&db));

    let admin = match store
        .account_by_email(&args.admin_email)
        .context("failed to look up admin account")?
    {
        Some(existing) => {
            tracing::info!(account_id = %existing.id, "admin account already seeded");
            existing
        }
        None => {
            let mut account = Account::new(
                &format!("admin_{}", uuid::Uuid::new_v4().simple()),
                &args.admin_name,
                &args.admin_email,
            );
            account.is_admin = true;
            let account = store
                .create_account(account)
                .context("failed to seed admin account")?;
            tracing::info!(account_id = %account.id, "admin account seeded");
            account
        }
    };
    db.flush().context("failed to flush database")?;

    println!("Gateway initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Admin account  : {}", admin.id);
    println!("  Admin email    : {}", admin.email);
    println!("  Referral code  : {}", admin.referral_code);

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("kobo-gateway {}", env!("CARGO_PKG_VERSION"));
    println!("ledger       {}", kobo_ledger::config::LEDGER_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
