//! Login Verifier Service
//!
//! Accepts session login tokens and answers whether they belong to a live session:
//! - Checks the token signature against the session key it names
//! - Loads the session account and rejects absent, revoked or expired sessions
//! - Exposes health and Prometheus metrics endpoints

mod api;
mod config;
mod metrics;

use anyhow::{Context, Result};
use sessions_sdk::{LoginVerifier, RpcLedger, SystemClock};
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Login Verifier");

    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize metrics
    let metrics_registry = metrics::init_metrics().context("Failed to register metrics")?;

    let mut verifier =
        LoginVerifier::new().with_session_manager_program(config.session_manager_program);
    if let Some(max_age) = config.token_max_age {
        verifier = verifier.with_max_age(max_age);
    }
    if let Some(domain) = &config.domain {
        verifier = verifier.with_domain(domain.clone());
    }

    let state = Arc::new(api::AppState {
        ledger: Arc::new(RpcLedger::new(
            config.rpc_url.clone(),
            CommitmentConfig::confirmed(),
        )),
        clock: Arc::new(SystemClock),
        verifier,
    });

    let api_handle = tokio::spawn(api::run_api_server(
        config.api_port,
        state,
        metrics_registry,
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        res = api_handle => {
            error!("API service exited: {:?}", res);
        }
    }

    info!("Shutting down Login Verifier");
    Ok(())
}
