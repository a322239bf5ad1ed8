//! Core client types: configuration and error handling

use crate::amount::AmountError;
use crate::intent::IntentError;
use crate::layout::LayoutError;
use crate::wallet::WalletError;
use solana_sdk::{pubkey, pubkey::Pubkey, signature::Signature};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

// ================================
// Program Identifiers
// ================================

/// Program that creates, checks and revokes session accounts
pub const SESSION_MANAGER_PROGRAM_ID: Pubkey =
    pubkey!("SesswvJ7puvAgpyqp7N8HnjNnvpnS8447tKNF3sPgbC");

/// Program holding the per-domain list of authorized programs
pub const DOMAIN_REGISTRY_PROGRAM_ID: Pubkey =
    pubkey!("DomaLfEueNY6JrQSEFjuXeUDiohFmSrFeTNTPamS2yog");

/// Program executing wallet-signed transfer intents
pub const INTENT_TRANSFER_PROGRAM_ID: Pubkey =
    pubkey!("Xfry4dW9m42ncAqm8LyEnyS5V6xT2DSJTHzNjeSpfE3");

// ================================
// Configuration Types
// ================================

/// Client configuration for one application domain
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chain identifier written into every intent
    pub chain_id: String,

    /// Application domain the sessions are scoped to
    pub domain: String,

    /// Base URL of the sponsoring relay
    pub relay_url: String,

    /// Session manager program
    pub session_manager_program: Pubkey,

    /// Domain registry program
    pub domain_registry_program: Pubkey,

    /// Intent transfer program
    pub intent_transfer_program: Pubkey,

    /// Lifetime granted to a newly established or renewed session
    pub session_duration: Duration,

    /// Major version of the session protocol
    pub major_version: u8,

    /// Minor version of the session protocol (also the record generation written)
    pub minor_version: u8,

    /// Application-defined lines appended to every session intent
    pub extra: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chain_id: "localnet".to_string(),
            domain: "http://localhost:3000".to_string(),
            relay_url: "http://localhost:4000".to_string(),
            session_manager_program: SESSION_MANAGER_PROGRAM_ID,
            domain_registry_program: DOMAIN_REGISTRY_PROGRAM_ID,
            intent_transfer_program: INTENT_TRANSFER_PROGRAM_ID,
            session_duration: Duration::from_secs(7 * 24 * 60 * 60),
            major_version: 0,
            minor_version: crate::layout::CURRENT_SESSION_GENERATION,
            extra: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn new(chain_id: impl Into<String>, domain: impl Into<String>, relay_url: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            domain: domain.into(),
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }

    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    pub fn with_programs(
        mut self,
        session_manager: Pubkey,
        domain_registry: Pubkey,
        intent_transfer: Pubkey,
    ) -> Self {
        self.session_manager_program = session_manager;
        self.domain_registry_program = domain_registry;
        self.intent_transfer_program = intent_transfer;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Session lifetime in whole seconds
    pub fn session_duration_secs(&self) -> i64 {
        i64::try_from(self.session_duration.as_secs()).unwrap_or(i64::MAX)
    }

    /// `major.minor` as written in intents
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major_version, self.minor_version)
    }
}

// ================================
// Error Types
// ================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid amount: {0}")]
    Amount(#[from] AmountError),

    #[error("Invalid intent: {0}")]
    Intent(#[from] IntentError),

    #[error("Invalid account data: {0}")]
    Layout(#[from] LayoutError),

    #[error("Signature from {signer} verifies over neither the raw nor the prefixed message")]
    UnverifiableSignature { signer: Pubkey },

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Relay responded with HTTP {status}: {body}")]
    PaymasterResponseError {
        status: u16,
        body: String,
        signature: Option<Signature>,
    },

    #[error("Malformed relay response: {0}")]
    MalformedRelayResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(Box<solana_client::client_error::ClientError>),

    #[error("Transaction failed on-chain: {error}")]
    ExecutionFailed {
        signature: Option<Signature>,
        error: serde_json::Value,
    },

    #[error("Account {0} not found")]
    AccountNotFound(Pubkey),

    #[error("No active session account at {0}")]
    SessionNotFound(Pubkey),

    #[error("Session expired at {expiration}")]
    SessionExpired { expiration: i64 },

    #[error("Spending {requested} of {mint} exceeds the session limit of {limit}")]
    LimitExceeded {
        mint: Pubkey,
        requested: u64,
        limit: u64,
    },

    #[error("Another session operation is in progress (state: {state})")]
    AlreadyInProgress { state: &'static str },

    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("State {state} cannot be canceled")]
    NotCancelable { state: &'static str },

    #[error("Operation was canceled")]
    Canceled,

    #[error("Invalid login token: {0}")]
    InvalidLoginToken(String),

    #[error("Transaction building failed: {0}")]
    TransactionBuild(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Whether the failed call may be repeated unchanged.
    ///
    /// Transport failures left no on-chain effect. Execution failures consumed a
    /// network-visible attempt and must be rebuilt with a fresh blockhash instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PaymasterResponseError { .. } | Self::Http(_) | Self::Rpc(_)
        )
    }

    /// Best-available transaction signature carried by relay failures
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::PaymasterResponseError { signature, .. } => *signature,
            Self::ExecutionFailed { signature, .. } => *signature,
            _ => None,
        }
    }
}

impl From<solana_client::client_error::ClientError> for SessionError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::Rpc(Box::new(err))
    }
}

impl From<bincode::Error> for SessionError {
    fn from(err: bincode::Error) -> Self {
        Self::TransactionBuild(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
