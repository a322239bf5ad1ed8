//! Wallet capability interface
//!
//! The protocol only needs a wallet to report its address and to sign bytes. How a
//! backend signs (local key, browser extension, hardware device) stays behind the trait.

use crate::verify::prefixed_message;
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("user rejected the request: {0}")]
    Rejected(String),

    #[error("wallet is not connected")]
    NotConnected,

    #[error("wallet cannot sign this message: {0}")]
    Unsupported(String),

    #[error("wallet backend failure: {0}")]
    Backend(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Display name used in logs
    fn name(&self) -> String;

    /// Connect and return the wallet's public key
    async fn connect(&self) -> Result<Pubkey, WalletError>;

    /// Sign `message`; the signature must verify over the raw or prefixed encoding
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, WalletError>;
}

pub type WalletHandle = Arc<dyn WalletSigner>;

/// Local keypair backend
pub struct KeypairWallet {
    keypair: Keypair,
    sign_prefixed: bool,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            sign_prefixed: false,
        }
    }

    /// Sign the off-chain envelope instead of the raw bytes, as some wallets do
    pub fn with_prefixed_signing(mut self) -> Self {
        self.sign_prefixed = true;
        self
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn name(&self) -> String {
        "keypair".to_string()
    }

    async fn connect(&self) -> Result<Pubkey, WalletError> {
        Ok(self.keypair.pubkey())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, WalletError> {
        if self.sign_prefixed {
            let prefixed = prefixed_message(message).ok_or_else(|| {
                WalletError::Unsupported(format!("{} byte message", message.len()))
            })?;
            Ok(self.keypair.sign_message(&prefixed))
        } else {
            Ok(self.keypair.sign_message(message))
        }
    }
}
