//! Persistence of session key material
//!
//! Keys are stored per wallet so reconnecting the same wallet can resume its session
//! without a new signature. Nothing stored here is ever sent over the network.

use crate::{Result, SessionError};
use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Session keypair last stored for `wallet`
    async fn load(&self, wallet: &Pubkey) -> Result<Option<Keypair>>;

    async fn save(&self, wallet: &Pubkey, session_key: &Keypair) -> Result<()>;

    async fn clear(&self, wallet: &Pubkey) -> Result<()>;
}

/// Process-local store; keys are lost when the process exits
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    keys: DashMap<Pubkey, [u8; 64]>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, wallet: &Pubkey) -> Result<Option<Keypair>> {
        let Some(bytes) = self.keys.get(wallet) else {
            return Ok(None);
        };
        Keypair::from_bytes(bytes.value())
            .map(Some)
            .map_err(|e| SessionError::Store(format!("corrupt key for {wallet}: {e}")))
    }

    async fn save(&self, wallet: &Pubkey, session_key: &Keypair) -> Result<()> {
        self.keys.insert(*wallet, session_key.to_bytes());
        Ok(())
    }

    async fn clear(&self, wallet: &Pubkey) -> Result<()> {
        self.keys.remove(wallet);
        Ok(())
    }
}
