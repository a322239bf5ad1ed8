//! Sponsor relay client
//!
//! One HTTP round-trip per submission, never retried here. Callers decide on retries
//! from [`SessionError::is_retryable`].

use crate::transaction::encode_transaction;
use crate::{Result, SessionError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Outcome of one relay submission
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    Success {
        signature: Signature,
    },
    /// `signature` is `None` when the relay reported one that does not parse
    Failed {
        signature: Option<Signature>,
        error: serde_json::Value,
    },
}

impl TransactionResult {
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::Success { signature } => Some(*signature),
            Self::Failed { signature, .. } => *signature,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Surface an on-chain failure as [`SessionError::ExecutionFailed`]
    pub fn into_result(self) -> Result<Signature> {
        match self {
            Self::Success { signature } => Ok(signature),
            Self::Failed { signature, error } => {
                Err(SessionError::ExecutionFailed { signature, error })
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SponsorAndSendRequest<'a> {
    transaction: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum SponsorAndSendResponse {
    Success {
        signature: String,
    },
    Failed {
        signature: String,
        error: serde_json::Value,
    },
}

fn parse_signature(text: &str) -> Result<Signature> {
    Signature::from_str(text)
        .map_err(|e| SessionError::MalformedRelayResponse(format!("bad signature {text:?}: {e}")))
}

/// Classify a relay reply by status code and body
pub fn classify_response(status: u16, body: &str) -> Result<TransactionResult> {
    if !(200..300).contains(&status) {
        let signature = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("signature")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| Signature::from_str(s).ok())
            });
        return Err(SessionError::PaymasterResponseError {
            status,
            body: body.to_string(),
            signature,
        });
    }

    let response: SponsorAndSendResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::MalformedRelayResponse(format!("{e}: {body}")))?;

    Ok(match response {
        SponsorAndSendResponse::Success { signature } => TransactionResult::Success {
            signature: parse_signature(&signature)?,
        },
        SponsorAndSendResponse::Failed { signature, error } => {
            let parsed = Signature::from_str(&signature).ok();
            if parsed.is_none() {
                warn!(signature, "relay reported an unparseable signature for a failed transaction");
            }
            TransactionResult::Failed {
                signature: parsed,
                error,
            }
        }
    })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Relay: Send + Sync {
    /// Fee payer the relay will sign with for `domain`
    async fn sponsor_address(&self, domain: &str) -> Result<Pubkey>;

    /// Submit a transaction missing only the sponsor signature
    async fn send(&self, transaction: &Transaction, domain: &str) -> Result<TransactionResult>;
}

/// Relay over HTTP, caching sponsor addresses per domain
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
    sponsors: DashMap<String, Pubkey>,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sponsors: DashMap::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn sponsor_address(&self, domain: &str) -> Result<Pubkey> {
        if let Some(sponsor) = self.sponsors.get(domain) {
            return Ok(*sponsor);
        }

        let response = self
            .client
            .get(format!("{}/api/sponsor_pubkey", self.base_url))
            .query(&[("domain", domain)])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 200 {
            warn!(domain, status, "sponsor lookup failed");
            return Err(SessionError::PaymasterResponseError {
                status,
                body,
                signature: None,
            });
        }

        let sponsor = Pubkey::from_str(body.trim()).map_err(|e| {
            SessionError::MalformedRelayResponse(format!("bad sponsor address {body:?}: {e}"))
        })?;
        debug!(domain, %sponsor, "cached sponsor address");
        self.sponsors.insert(domain.to_string(), sponsor);
        Ok(sponsor)
    }

    async fn send(&self, transaction: &Transaction, domain: &str) -> Result<TransactionResult> {
        let encoded = encode_transaction(transaction)?;
        let response = self
            .client
            .post(format!("{}/api/sponsor_and_send", self.base_url))
            .query(&[("domain", domain)])
            .json(&SponsorAndSendRequest {
                transaction: &encoded,
            })
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let result = classify_response(status, &body);
        match &result {
            Ok(TransactionResult::Success { signature }) => {
                info!(domain, %signature, "relay confirmed transaction");
            }
            Ok(TransactionResult::Failed { signature, error }) => {
                warn!(domain, ?signature, %error, "transaction failed on-chain");
            }
            Err(e) => warn!(domain, error = %e, "relay submission failed"),
        }
        result
    }
}
