//! # CLI Interface
//!
//! Command-line structure for `ussd-node`, built with `clap` derive. Every
//! `run` option can also be supplied through a `USSD_*` environment
//! variable.

use clap::{Parser, Subcommand};

use ussd_gateway::config;

use crate::logging::LogFormat;

/// USSD session gateway node.
///
/// Serves the session protocol (`/session/*`) and the wallet-linking
/// callback over HTTP, and exposes Prometheus metrics on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "ussd-node",
    about = "USSD session gateway node",
    version,
    propagate_version = true
)]
pub struct UssdNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway and its HTTP listeners.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the session API.
    #[arg(long, env = "USSD_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "USSD_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Secret the session encryption key is derived from.
    ///
    /// When omitted a random secret is generated and sessions are lost on
    /// restart.
    #[arg(long, env = "USSD_SESSION_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Idle timeout for a session, in seconds.
    #[arg(long, env = "USSD_SESSION_TIMEOUT", default_value_t = config::SESSION_TIMEOUT.as_secs())]
    pub session_timeout: u64,

    /// Upper bound on live sessions.
    #[arg(long, env = "USSD_MAX_SESSIONS", default_value_t = config::MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Smallest purchase amount accepted.
    #[arg(long, env = "USSD_MIN_AMOUNT", default_value_t = config::MIN_PURCHASE_AMOUNT)]
    pub min_amount: u64,

    /// Largest purchase amount accepted.
    #[arg(long, env = "USSD_MAX_AMOUNT", default_value_t = config::MAX_PURCHASE_AMOUNT)]
    pub max_amount: u64,

    /// Lifetime of a wallet-linking token, in seconds.
    #[arg(long, env = "USSD_LINK_TTL", default_value_t = config::LINK_TTL.as_secs())]
    pub link_ttl: u64,

    /// Reject wallet callbacks without a valid signature.
    #[arg(long, env = "USSD_REQUIRE_LINK_SIGNATURE")]
    pub require_link_signature: bool,

    /// Log output format.
    #[arg(long, env = "USSD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}
