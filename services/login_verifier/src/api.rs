//! REST API for login token verification

use crate::metrics;
use anyhow::Result;
use prometheus::{Encoder, Registry};
use serde::{Deserialize, Serialize};
use sessions_sdk::{Clock, Ledger, LoginVerifier};
use std::sync::Arc;
use tracing::{debug, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Everything a request handler needs
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub clock: Arc<dyn Clock>,
    pub verifier: LoginVerifier,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub user: String,
    pub session: String,
    pub sponsor: String,
    pub expiration: i64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_api_server(port: u16, state: Arc<AppState>, registry: Registry) -> Result<()> {
    tracing::info!("API server listening on port {}", port);
    warp::serve(routes(state, Arc::new(registry)))
        .run(([0, 0, 0, 0], port))
        .await;
    Ok(())
}

pub fn routes(
    state: Arc<AppState>,
    registry: Arc<Registry>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let metrics = warp::path("metrics")
        .and(warp::get())
        .and(with_metrics(registry))
        .map(get_metrics);

    let verify = warp::path("verify")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(verify_handler);

    health.or(metrics).or(verify)
}

// Helper filters
fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_metrics(
    registry: Arc<Registry>,
) -> impl Filter<Extract = (Arc<Registry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

// Handler functions
fn get_metrics(registry: Arc<Registry>) -> warp::reply::Response {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    warp::reply::with_header(buffer, "Content-Type", encoder.format_type()).into_response()
}

async fn verify_handler(
    request: VerifyRequest,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let timer = metrics::VERIFICATION_TIME.start_timer();
    let result = state
        .verifier
        .verify(&request.token, state.ledger.as_ref(), state.clock.as_ref())
        .await;
    timer.observe_duration();

    let reply = match result {
        Ok(claims) => {
            metrics::TOKENS_VERIFIED_TOTAL.inc();
            debug!("Verified login for user {}", claims.user);
            warp::reply::with_status(
                warp::reply::json(&VerifyResponse {
                    user: claims.user.to_string(),
                    session: claims.session.to_string(),
                    sponsor: claims.sponsor.to_string(),
                    expiration: claims.expiration,
                }),
                StatusCode::OK,
            )
        }
        // Ledger unreachable: the token may be fine, so do not report it as rejected
        Err(e) if e.is_retryable() => {
            metrics::LEDGER_ERRORS_TOTAL.inc();
            warn!("Ledger read failed during verification: {}", e);
            warp::reply::with_status(
                warp::reply::json(&ErrorResponse {
                    error: e.to_string(),
                }),
                StatusCode::BAD_GATEWAY,
            )
        }
        Err(e) => {
            metrics::TOKENS_REJECTED_TOTAL.inc();
            debug!("Rejected login token: {}", e);
            warp::reply::with_status(
                warp::reply::json(&ErrorResponse {
                    error: e.to_string(),
                }),
                StatusCode::UNAUTHORIZED,
            )
        }
    };
    Ok(reply)
}
