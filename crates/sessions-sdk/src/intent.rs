//! Canonical signing-request text
//!
//! An intent is a description followed by `key: value` lines. The composed bytes are
//! exactly what the wallet signs and what the verification instruction carries, so
//! every caller goes through [`Intent::to_bytes`].

use crate::amount::token_amount_to_string;
use chrono::{DateTime, SecondsFormat};
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;
use thiserror::Error;

/// Header shown above every session authorization
pub const SESSION_INTENT_DESCRIPTION: &str = "Sessions:\n\
Signing this intent will allow this app to interact with your on-chain balances. \
Please make sure you trust this app and the domain in the message matches the domain \
of the current web application.\n";

/// Header shown above every transfer authorization
pub const TRANSFER_INTENT_DESCRIPTION: &str = "Token transfer:\n\
Signing this intent will transfer the tokens as described below.\n";

pub const SESSION_RESERVED_KEYS: &[&str] =
    &["version", "chain_id", "domain", "expires", "session_key", "tokens"];

pub const TRANSFER_RESERVED_KEYS: &[&str] =
    &["version", "chain_id", "token", "amount", "recipient", "nonce"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("key `{0}` is not snake_case")]
    InvalidKey(String),

    #[error("key `{0}` is reserved")]
    ReservedKey(String),

    #[error("value for `{0}` contains a line break")]
    MultilineValue(String),

    #[error("key `{0}` appears twice")]
    DuplicateKey(String),

    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Snake-case check: `^[a-z]+(_[a-z0-9]+)*$`
pub fn is_valid_key(key: &str) -> bool {
    let mut segments = key.split('_');
    let head_ok = segments
        .next()
        .is_some_and(|head| !head.is_empty() && head.bytes().all(|b| b.is_ascii_lowercase()));
    head_ok
        && segments.all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

/// A composed signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    description: String,
    parameters: Vec<(String, String)>,
}

impl Intent {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Canonical text: the description, a line break, then the parameter lines
    pub fn to_text(&self) -> String {
        let lines = self
            .parameters
            .iter()
            .map(|(key, value)| {
                if value.starts_with('\n') {
                    format!("{key}:{value}")
                } else {
                    format!("{key}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n{}", self.description, lines)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }
}

/// Reserved keys whose value is a list of `-`-prefixed lines
pub const LIST_KEYS: &[&str] = &["tokens"];

fn is_list_value(value: &str) -> bool {
    !value.contains('\r')
        && value
            .split('\n')
            .enumerate()
            .all(|(i, line)| if i == 0 { line.is_empty() } else { line.starts_with('-') })
}

/// Builds an [`Intent`], keeping reserved parameters ahead of caller extras
#[derive(Debug, Clone)]
pub struct IntentBuilder {
    description: String,
    reserved_keys: &'static [&'static str],
    reserved: Vec<(String, String)>,
    extra: Vec<(String, String)>,
}

impl IntentBuilder {
    pub fn new(description: impl Into<String>, reserved_keys: &'static [&'static str]) -> Self {
        Self {
            description: description.into(),
            reserved_keys,
            reserved: Vec::new(),
            extra: Vec::new(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.reserved
            .iter()
            .chain(self.extra.iter())
            .any(|(k, _)| k == key)
    }

    /// Add a library-produced parameter. Only list keys may span lines, and only as
    /// `\n-<item>` entries.
    pub fn reserved(mut self, key: &str, value: impl Into<String>) -> Result<Self, IntentError> {
        let value = value.into();
        if !self.reserved_keys.contains(&key) || !is_valid_key(key) {
            return Err(IntentError::InvalidKey(key.to_string()));
        }
        let well_formed = if LIST_KEYS.contains(&key) {
            is_list_value(&value)
        } else {
            !value.contains(['\n', '\r'])
        };
        if !well_formed {
            return Err(IntentError::MultilineValue(key.to_string()));
        }
        if self.contains(key) {
            return Err(IntentError::DuplicateKey(key.to_string()));
        }
        self.reserved.push((key.to_string(), value));
        Ok(self)
    }

    /// Add a caller-supplied parameter.
    pub fn extra(mut self, key: &str, value: &str) -> Result<Self, IntentError> {
        if !is_valid_key(key) {
            return Err(IntentError::InvalidKey(key.to_string()));
        }
        if self.reserved_keys.contains(&key) {
            return Err(IntentError::ReservedKey(key.to_string()));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(IntentError::MultilineValue(key.to_string()));
        }
        if self.contains(key) {
            return Err(IntentError::DuplicateKey(key.to_string()));
        }
        self.extra.push((key.to_string(), value.to_string()));
        Ok(self)
    }

    pub fn extras<'a>(
        self,
        extras: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, IntentError> {
        extras
            .into_iter()
            .try_fold(self, |builder, (key, value)| builder.extra(key, value))
    }

    pub fn build(self) -> Intent {
        let mut parameters = self.reserved;
        parameters.extend(self.extra);
        Intent {
            description: self.description,
            parameters,
        }
    }
}

/// Render a unix timestamp the way intents carry it (RFC 3339, UTC, milliseconds)
pub fn format_expiry(unix_seconds: i64) -> Result<String, IntentError> {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or(IntentError::InvalidTimestamp(unix_seconds))
}

/// Token limit line items: `mint -> (base units, decimals)`
pub type TokenLines = BTreeMap<Pubkey, (u64, u32)>;

/// Render token limits in list form, one `-<mint>: <amount>` line each
pub fn format_token_list(tokens: &TokenLines) -> String {
    tokens
        .iter()
        .map(|(mint, (amount, decimals))| {
            format!("\n-{mint}: {}", token_amount_to_string(*amount, *decimals))
        })
        .collect()
}

/// Inputs of a session authorization intent
#[derive(Debug, Clone)]
pub struct SessionIntentParams<'a> {
    pub version: String,
    pub chain_id: &'a str,
    pub domain: &'a str,
    pub expires: i64,
    pub session_key: Pubkey,
    /// `None` authorizes every token; an empty list authorizes none
    pub tokens: Option<&'a TokenLines>,
    pub extra: &'a BTreeMap<String, String>,
}

pub fn compose_session_intent(params: &SessionIntentParams<'_>) -> Result<Intent, IntentError> {
    let mut builder = IntentBuilder::new(SESSION_INTENT_DESCRIPTION, SESSION_RESERVED_KEYS)
        .reserved("version", params.version.clone())?
        .reserved("chain_id", params.chain_id)?
        .reserved("domain", params.domain)?
        .reserved("expires", format_expiry(params.expires)?)?
        .reserved("session_key", params.session_key.to_string())?;
    if let Some(tokens) = params.tokens {
        builder = builder.reserved("tokens", format_token_list(tokens))?;
    }
    Ok(builder.extras(params.extra.iter())?.build())
}

/// Inputs of a transfer intent
#[derive(Debug, Clone)]
pub struct TransferIntentParams<'a> {
    pub version: String,
    pub chain_id: &'a str,
    pub mint: Pubkey,
    pub amount: u64,
    pub decimals: u32,
    pub recipient: Pubkey,
    pub nonce: u64,
}

pub fn compose_transfer_intent(params: &TransferIntentParams<'_>) -> Result<Intent, IntentError> {
    Ok(
        IntentBuilder::new(TRANSFER_INTENT_DESCRIPTION, TRANSFER_RESERVED_KEYS)
            .reserved("version", params.version.clone())?
            .reserved("chain_id", params.chain_id)?
            .reserved("token", params.mint.to_string())?
            .reserved("amount", token_amount_to_string(params.amount, params.decimals))?
            .reserved("recipient", params.recipient.to_string())?
            .reserved("nonce", params.nonce.to_string())?
            .build(),
    )
}
