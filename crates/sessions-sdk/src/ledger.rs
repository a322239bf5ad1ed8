//! Read-only ledger access
//!
//! The client never writes through this interface; transactions go out through the
//! relay. `RpcLedger` is the production implementation over the nonblocking RPC client.

use crate::layout::token::{decode_mint, decode_token_account, from_parsed};
use crate::layout::{
    decode_session, DomainRecord, LayoutError, Mint, NonceAccount, SessionAccount, TokenAccount,
};
use crate::{address, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_request::TokenAccountsFilter};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Account data with its owning program, `None` when the account does not exist
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    /// Token program accounts owned by `owner`
    async fn get_token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<(Pubkey, TokenAccount)>>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;
}

/// Ledger reads over JSON-RPC
pub struct RpcLedger {
    rpc_client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(rpc_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            rpc_client: Arc::new(RpcClient::new_with_commitment(rpc_url, commitment)),
            commitment,
        }
    }

    pub fn from_client(rpc_client: Arc<RpcClient>) -> Self {
        let commitment = rpc_client.commitment();
        Self {
            rpc_client,
            commitment,
        }
    }

    pub fn rpc_client(&self) -> &Arc<RpcClient> {
        &self.rpc_client
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let response = self
            .rpc_client
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<(Pubkey, TokenAccount)>> {
        let keyed_accounts = self
            .rpc_client
            .get_token_accounts_by_owner_with_commitment(
                owner,
                TokenAccountsFilter::ProgramId(spl_token::id()),
                self.commitment,
            )
            .await?
            .value;

        let mut parsed = Vec::with_capacity(keyed_accounts.len());
        for keyed in keyed_accounts {
            let address = Pubkey::from_str(&keyed.pubkey).map_err(|e| {
                LayoutError::ParsedTokenAccount(format!("bad address {:?}: {e}", keyed.pubkey))
            })?;
            let token_account = match &keyed.account.data {
                UiAccountData::Json(account) => from_parsed(&account.parsed["info"])?,
                UiAccountData::Binary(blob, UiAccountEncoding::Base64) => {
                    let data = STANDARD.decode(blob).map_err(|e| {
                        LayoutError::ParsedTokenAccount(format!("account {address}: {e}"))
                    })?;
                    decode_token_account(&data)?
                }
                _ => {
                    return Err(LayoutError::ParsedTokenAccount(format!(
                        "account {address} returned in an unsupported encoding"
                    ))
                    .into())
                }
            };
            parsed.push((address, token_account));
        }
        debug!(%owner, count = parsed.len(), "fetched token accounts");
        Ok(parsed)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(self.rpc_client.get_latest_blockhash().await?)
    }
}

// ================================
// Typed Fetch Helpers
// ================================

/// Account data at `address`, provided `expected_owner` owns it
async fn fetch_owned<L: Ledger + ?Sized>(
    ledger: &L,
    address: &Pubkey,
    account: &'static str,
    expected_owner: &Pubkey,
) -> Result<Option<Vec<u8>>> {
    let Some(found) = ledger.get_account(address).await? else {
        return Ok(None);
    };
    if found.owner != *expected_owner {
        warn!(account, %address, owner = %found.owner, "account has an unexpected owner");
        return Err(LayoutError::WrongOwner {
            account,
            address: *address,
            owner: found.owner,
            expected: *expected_owner,
        }
        .into());
    }
    Ok(Some(found.data))
}

/// Fetch and decode a session account, `None` when absent or revoked
pub async fn fetch_session<L: Ledger + ?Sized>(
    ledger: &L,
    session: &Pubkey,
    session_manager_program: &Pubkey,
) -> Result<Option<SessionAccount>> {
    match fetch_owned(ledger, session, "Session", session_manager_program).await? {
        Some(data) => Ok(decode_session(&data)?),
        None => Ok(None),
    }
}

/// Fetch a domain's program registry; an absent record authorizes nothing
pub async fn fetch_domain_record<L: Ledger + ?Sized>(
    ledger: &L,
    domain: &str,
    registry_program: &Pubkey,
) -> Result<DomainRecord> {
    let (record_address, _) = address::domain_record_address(domain, registry_program);
    match fetch_owned(ledger, &record_address, "DomainRecord", registry_program).await? {
        Some(data) => Ok(DomainRecord::decode(&data)?),
        None => {
            warn!(domain, %record_address, "no domain record found");
            Ok(DomainRecord::default())
        }
    }
}

/// Fetch an owner's intent-transfer nonce; a missing account means no transfer yet
pub async fn fetch_nonce<L: Ledger + ?Sized>(
    ledger: &L,
    owner: &Pubkey,
    intent_transfer_program: &Pubkey,
) -> Result<NonceAccount> {
    let (nonce_address, _) = address::nonce_address(owner, intent_transfer_program);
    match fetch_owned(ledger, &nonce_address, "Nonce", intent_transfer_program).await? {
        Some(data) => Ok(NonceAccount::decode(&data)?),
        None => Ok(NonceAccount::default()),
    }
}

/// Fetch and decode a mint, `None` when the account does not exist
pub async fn fetch_mint<L: Ledger + ?Sized>(ledger: &L, mint: &Pubkey) -> Result<Option<Mint>> {
    match fetch_owned(ledger, mint, "Mint", &spl_token::id()).await? {
        Some(data) => Ok(Some(decode_mint(&data)?)),
        None => Ok(None),
    }
}

/// Account owned by `owner`, for fakes and tests
pub fn owned_account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 1,
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}
