//! Sponsored one-off token transfers authorized by a wallet-signed intent
//!
//! No session is involved: the wallet signs a transfer intent carrying the owner's
//! next nonce, and the intent-transfer program moves the tokens. Replays fail on-chain
//! because the nonce account advances with every transfer.

use crate::amount::string_to_token_amount;
use crate::cache::DecimalsCache;
use crate::core::SessionConfig;
use crate::intent::{compose_transfer_intent, TransferIntentParams};
use crate::ledger::{fetch_nonce, Ledger};
use crate::relay::Relay;
use crate::transaction::{ed25519_verify_instruction, send_tokens_instruction, TransactionBuilder};
use crate::verify::verify_signature;
use crate::wallet::WalletSigner;
use crate::Result;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tracing::info;

/// Version line of transfer intents
pub const TRANSFER_INTENT_VERSION: &str = "0.1";

pub struct IntentTransferClient {
    config: SessionConfig,
    ledger: Arc<dyn Ledger>,
    relay: Arc<dyn Relay>,
    decimals: DecimalsCache,
}

impl IntentTransferClient {
    pub fn new(config: SessionConfig, ledger: Arc<dyn Ledger>, relay: Arc<dyn Relay>) -> Self {
        Self {
            config,
            ledger,
            relay,
            decimals: DecimalsCache::new(),
        }
    }

    pub fn with_decimals_cache(mut self, decimals: DecimalsCache) -> Self {
        self.decimals = decimals;
        self
    }

    /// Transfer `amount` (decimal text, in whole tokens) of `mint` to `recipient`
    pub async fn transfer(
        &self,
        wallet: &dyn WalletSigner,
        mint: &Pubkey,
        amount: &str,
        recipient: &Pubkey,
    ) -> Result<Signature> {
        let owner = wallet.connect().await?;
        let decimals = u32::from(
            self.decimals
                .get_or_fetch(self.ledger.as_ref(), &self.config.chain_id, mint)
                .await?,
        );
        let amount = string_to_token_amount(amount, decimals)?;
        let nonce = fetch_nonce(
            self.ledger.as_ref(),
            &owner,
            &self.config.intent_transfer_program,
        )
        .await?
        .next();

        let intent = compose_transfer_intent(&TransferIntentParams {
            version: TRANSFER_INTENT_VERSION.to_string(),
            chain_id: &self.config.chain_id,
            mint: *mint,
            amount,
            decimals,
            recipient: *recipient,
            nonce,
        })?;
        let message = intent.to_bytes();

        let signature = wallet.sign_message(&message).await?;
        let verified = verify_signature(&owner, &signature, &message)?;

        let sponsor = self.relay.sponsor_address(&self.config.domain).await?;
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let transaction = TransactionBuilder::new(sponsor)
            .add_instruction(ed25519_verify_instruction(&verified)?)
            .add_instruction(send_tokens_instruction(
                &self.config,
                &sponsor,
                &owner,
                mint,
                recipient,
            ))
            .build(blockhash, &[])?;

        let signature = self
            .relay
            .send(&transaction, &self.config.domain)
            .await?
            .into_result()?;
        info!(%owner, %mint, %recipient, amount, nonce, %signature, "intent transfer confirmed");
        Ok(signature)
    }
}
