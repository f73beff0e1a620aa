// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # USSD Gateway Node
//!
//! Entry point for the `ussd-node` binary. Parses CLI arguments,
//! initializes logging and metrics, builds the gateway over the in-memory
//! devnet ledger and serves the HTTP API.
//!
//! - `run`     — start the gateway
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use tokio::signal;

use ussd_gateway::{Gateway, GatewayConfig, InMemoryLedger};

use cli::{Commands, UssdNodeCli};
use metrics::NodeMetrics;

/// Length of the generated secret when none is configured.
const GENERATED_SECRET_BYTES: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = UssdNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Builds the gateway config from CLI arguments.
fn gateway_config(args: &cli::RunArgs) -> Result<GatewayConfig> {
    anyhow::ensure!(
        args.min_amount <= args.max_amount,
        "--min-amount ({}) exceeds --max-amount ({})",
        args.min_amount,
        args.max_amount
    );
    anyhow::ensure!(args.max_sessions > 0, "--max-sessions must be positive");

    let secret = match &args.secret {
        Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
        _ => {
            tracing::warn!(
                "no session secret configured (USSD_SESSION_SECRET); \
                 using a random one, sessions will not survive a restart"
            );
            let mut secret = vec![0u8; GENERATED_SECRET_BYTES];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            secret
        }
    };

    Ok(GatewayConfig {
        session_timeout: Duration::from_secs(args.session_timeout),
        max_sessions: args.max_sessions,
        min_amount: args.min_amount,
        max_amount: args.max_amount,
        link_ttl: Duration::from_secs(args.link_ttl),
        require_link_signature: args.require_link_signature,
        ..GatewayConfig::with_secret(secret)
    })
}

/// Starts the gateway: API server, metrics endpoint and the maintenance
/// sweep.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVE, args.log_format);

    let config = gateway_config(&args).context("invalid configuration")?;
    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        session_timeout_secs = config.session_timeout.as_secs(),
        max_sessions = config.max_sessions,
        require_link_signature = config.require_link_signature,
        "starting ussd-node"
    );

    // --- Gateway ---
    let ledger = Arc::new(InMemoryLedger::default());
    let gateway = Arc::new(Gateway::new(config, ledger));
    gateway.spawn_maintenance();

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        gateway: Arc::clone(&gateway),
        metrics: Arc::clone(&node_metrics),
        version: format!(
            "{} (gateway {})",
            env!("CARGO_PKG_VERSION"),
            ussd_gateway::config::GATEWAY_VERSION,
        ),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    gateway.shutdown();
    tracing::info!("ussd-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("ussd-node {}", env!("CARGO_PKG_VERSION"));
    println!("gateway   {}", ussd_gateway::config::GATEWAY_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
