//! Prometheus metrics for monitoring

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

lazy_static! {
    pub static ref TOKENS_VERIFIED_TOTAL: IntCounter = IntCounter::new(
        "login_tokens_verified_total",
        "Total number of login tokens accepted"
    )
    .expect("metric options are valid");

    pub static ref TOKENS_REJECTED_TOTAL: IntCounter = IntCounter::new(
        "login_tokens_rejected_total",
        "Total number of login tokens rejected"
    )
    .expect("metric options are valid");

    pub static ref LEDGER_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "login_ledger_errors_total",
        "Total number of verifications that failed to read the ledger"
    )
    .expect("metric options are valid");

    pub static ref VERIFICATION_TIME: Histogram = Histogram::with_opts(HistogramOpts::new(
        "login_verification_duration_seconds",
        "Time taken to verify a login token"
    ))
    .expect("metric options are valid");
}

pub fn init_metrics() -> prometheus::Result<Registry> {
    let registry = Registry::new();

    registry.register(Box::new(TOKENS_VERIFIED_TOTAL.clone()))?;
    registry.register(Box::new(TOKENS_REJECTED_TOTAL.clone()))?;
    registry.register(Box::new(LEDGER_ERRORS_TOTAL.clone()))?;
    registry.register(Box::new(VERIFICATION_TIME.clone()))?;

    Ok(registry)
}
