//! # CLI Interface
//!
//! Defines the command-line argument structure for `kobo-gateway` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kobo_ledger::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

/// Kobo wallet gateway.
///
/// Serves the wallet API: payment-webhook ingestion, service purchases,
/// PIN authorization, referral rewards, and account reads. Exposes
/// Prometheus metrics on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "kobo-gateway",
    about = "Kobo wallet ledger gateway",
    version,
    propagate_version = true
)]
pub struct KoboGatewayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the gateway binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Initialize a data directory and seed the administrative account.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the data directory holding the ledger database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "KOBO_DATA_DIR", default_value = "~/.kobo")]
    pub data_dir: PathBuf,

    /// Port for the wallet HTTP API.
    #[arg(long, env = "KOBO_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KOBO_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "KOBO_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, env = "KOBO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Vend-provider stub behavior: "confirm", "reject", "unavailable",
    /// or "flaky". Devnet only — production wires a real vendor adapter.
    #[arg(long, env = "KOBO_PROVIDER_MODE", default_value = "confirm")]
    pub provider_mode: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "KOBO_DATA_DIR", default_value = "~/.kobo")]
    pub data_dir: PathBuf,

    /// Email for the seeded administrative account.
    #[arg(long, default_value = "admin@kobopay.dev")]
    pub admin_email: String,

    /// Display name for the seeded administrative account.
    #[arg(long, default_value = "Kobo Admin")]
    pub admin_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        KoboGatewayCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = KoboGatewayCli::parse_from(["kobo-gateway", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api_port, DEFAULT_API_PORT);
                assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
                assert_eq!(args.provider_mode, "confirm");
            }
            other => panic!("expected run, got {other:?}"),
        }
    }
}
