//! Mint decimals cache keyed by `(network, mint)`
//!
//! Decimals never change for a mint, so entries are kept for the cache's lifetime.
//! The network is part of the key because the same address may be a different mint
//! on another chain.

use crate::ledger::{fetch_mint, Ledger};
use crate::{Result, SessionError};
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct DecimalsCache {
    entries: Arc<DashMap<(String, Pubkey), u8>>,
}

impl DecimalsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, network: &str, mint: &Pubkey) -> Option<u8> {
        self.entries
            .get(&(network.to_string(), *mint))
            .map(|entry| *entry.value())
    }

    pub fn insert(&self, network: &str, mint: Pubkey, decimals: u8) {
        self.entries.insert((network.to_string(), mint), decimals);
    }

    /// Cached decimals, reading the mint account on a miss
    pub async fn get_or_fetch<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        network: &str,
        mint: &Pubkey,
    ) -> Result<u8> {
        if let Some(decimals) = self.get(network, mint) {
            return Ok(decimals);
        }

        let account = fetch_mint(ledger, mint)
            .await?
            .ok_or(SessionError::AccountNotFound(*mint))?;
        debug!(network, %mint, decimals = account.decimals, "cached mint decimals");
        self.insert(network, *mint, account.decimals);
        Ok(account.decimals)
    }
}
