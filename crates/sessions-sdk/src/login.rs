//! Session login tokens
//!
//! A token proves possession of a live session key:
//! `base58(json) + "." + base58(signature)`, where the JSON is
//! `{"iat": <unix seconds>, "sessionPublicKey": "<base58>"}` and the signature is the
//! session key's over those exact JSON bytes.

use crate::clock::Clock;
use crate::ledger::{fetch_session, Ledger};
use crate::{address, Result, SessionError, SESSION_MANAGER_PROGRAM_ID};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub iat: i64,
    pub session_public_key: String,
}

/// Who a verified token belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginClaims {
    pub user: Pubkey,
    pub session: Pubkey,
    pub sponsor: Pubkey,
    pub expiration: i64,
    pub issued_at: i64,
}

pub fn create_login_token(session_key: &Keypair, iat: i64) -> Result<String> {
    let payload = serde_json::to_vec(&LoginPayload {
        iat,
        session_public_key: session_key.pubkey().to_string(),
    })?;
    let signature = session_key.sign_message(&payload);
    Ok(format!(
        "{}.{}",
        bs58::encode(&payload).into_string(),
        bs58::encode(signature.as_ref()).into_string()
    ))
}

/// Verifies tokens against on-chain session records
#[derive(Debug, Clone)]
pub struct LoginVerifier {
    session_manager_program: Pubkey,
    max_age: Option<i64>,
    domain: Option<String>,
}

impl Default for LoginVerifier {
    fn default() -> Self {
        Self {
            session_manager_program: SESSION_MANAGER_PROGRAM_ID,
            max_age: None,
            domain: None,
        }
    }
}

impl LoginVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only trust session records owned by `program`
    pub fn with_session_manager_program(mut self, program: Pubkey) -> Self {
        self.session_manager_program = program;
        self
    }

    /// Reject tokens issued more than `seconds` ago
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Reject sessions recorded for another domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub async fn verify<L: Ledger + ?Sized>(
        &self,
        token: &str,
        ledger: &L,
        clock: &dyn Clock,
    ) -> Result<LoginClaims> {
        let (payload_bytes, signature) = split_token(token)?;
        let payload: LoginPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| invalid(format!("payload is not valid JSON: {e}")))?;
        let session = Pubkey::from_str(&payload.session_public_key)
            .map_err(|e| invalid(format!("bad session key: {e}")))?;

        if !signature.verify(session.as_ref(), &payload_bytes) {
            return Err(invalid("signature does not match session key"));
        }

        let now = clock.now();
        if let Some(max_age) = self.max_age {
            if now.saturating_sub(payload.iat) > max_age {
                return Err(invalid(format!("issued at {} is too old", payload.iat)));
            }
        }

        let account = fetch_session(ledger, &session, &self.session_manager_program)
            .await?
            .ok_or(SessionError::SessionNotFound(session))?;
        if account.is_expired(now) {
            return Err(SessionError::SessionExpired {
                expiration: account.expiration,
            });
        }
        if let (Some(domain), Some(recorded)) = (&self.domain, account.domain_hash) {
            if address::domain_hash(domain) != recorded {
                return Err(invalid("session belongs to another domain"));
            }
        }

        debug!(%session, user = %account.user, "login token verified");
        Ok(LoginClaims {
            user: account.user,
            session,
            sponsor: account.sponsor,
            expiration: account.expiration,
            issued_at: payload.iat,
        })
    }
}

/// Verify with no age or domain restriction
pub async fn verify_login_token<L: Ledger + ?Sized>(
    token: &str,
    ledger: &L,
    clock: &dyn Clock,
) -> Result<LoginClaims> {
    LoginVerifier::new().verify(token, ledger, clock).await
}

fn split_token(token: &str) -> Result<(Vec<u8>, Signature)> {
    let (payload, signature) = token
        .split_once('.')
        .ok_or_else(|| invalid("missing separator"))?;
    let payload = bs58::decode(payload)
        .into_vec()
        .map_err(|e| invalid(format!("payload is not base58: {e}")))?;
    let signature = bs58::decode(signature)
        .into_vec()
        .map_err(|e| invalid(format!("signature is not base58: {e}")))?;
    let signature = Signature::try_from(signature.as_slice())
        .map_err(|_| invalid("signature must be 64 bytes"))?;
    Ok((payload, signature))
}

fn invalid(reason: impl Into<String>) -> SessionError {
    SessionError::InvalidLoginToken(reason.into())
}
