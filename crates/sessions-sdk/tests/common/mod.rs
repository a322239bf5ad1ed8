//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::DateTime;
use dashmap::DashMap;
use sessions_sdk::address;
use sessions_sdk::layout::{
    instruction_discriminator, ActiveSessionInfoV4, AuthorizedPrograms,
    AuthorizedTokensWithMints, Mint, SessionAccountData, TokenAccount,
};
use sessions_sdk::{
    owned_account, InMemorySessionStore, KeypairWallet, Ledger, ManualClock, Relay, Result,
    SessionConfig, SessionError, SessionManager, TransactionResult, WalletError, WalletHandle,
    WalletSigner, SESSION_MANAGER_PROGRAM_ID,
};
use solana_sdk::{
    account::Account,
    ed25519_program,
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::Transaction,
};
use spl_token::solana_program::program_pack::Pack;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const NOW: i64 = 1_700_000_000;

// ================================
// Ledger
// ================================

#[derive(Default)]
pub struct FakeLedger {
    pub accounts: DashMap<Pubkey, Account>,
    pub token_accounts: Mutex<Vec<(Pubkey, TokenAccount)>>,
}

impl FakeLedger {
    pub fn add_mint(&self, mint: Pubkey, decimals: u8) {
        let state = Mint {
            decimals,
            is_initialized: true,
            ..Mint::default()
        };
        let mut data = vec![0u8; Mint::LEN];
        Mint::pack(state, &mut data).unwrap();
        self.accounts.insert(mint, owned_account(spl_token::id(), data));
    }

    pub fn has_account(&self, address: &Pubkey) -> bool {
        self.accounts.contains_key(address)
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self.accounts.get(address).map(|account| account.clone()))
    }

    async fn get_token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<(Pubkey, TokenAccount)>> {
        Ok(self
            .token_accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, account)| &account.owner == owner)
            .cloned()
            .collect())
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }
}

// ================================
// Relay
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Succeed,
    FailOnChain,
    HttpStatus(u16),
}

/// Relay that applies start/revoke instructions to a `FakeLedger`
pub struct FakeRelay {
    pub sponsor: Pubkey,
    pub ledger: Arc<FakeLedger>,
    pub mode: Mutex<RelayMode>,
    pub sent: Mutex<Vec<Transaction>>,
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl FakeRelay {
    pub fn new(ledger: Arc<FakeLedger>) -> Self {
        Self {
            sponsor: Pubkey::new_unique(),
            ledger,
            mode: Mutex::new(RelayMode::Succeed),
            sent: Mutex::new(vec![]),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    /// Hold every submission until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_mode(&self, mode: RelayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_with(&self, instruction: &str) -> usize {
        let discriminator = instruction_discriminator(instruction);
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| tx.message.instructions.iter().any(|ix| ix.data == discriminator))
            .count()
    }

    fn apply(&self, tx: &Transaction) {
        let keys = &tx.message.account_keys;
        let verified = tx.message.instructions.iter().find_map(|ix| {
            (keys[ix.program_id_index as usize] == ed25519_program::id()).then(|| {
                let signer = Pubkey::try_from(&ix.data[16..48]).unwrap();
                (signer, String::from_utf8_lossy(&ix.data[112..]).to_string())
            })
        });

        for ix in &tx.message.instructions {
            if ix.data == instruction_discriminator("start_session") {
                let (user, intent) = verified.clone().unwrap();
                let session = keys[ix.accounts[1] as usize];
                let mints: Vec<Pubkey> = ix.accounts[7..]
                    .chunks(2)
                    .map(|pair| keys[pair[1] as usize])
                    .collect();
                let authorized_tokens = if intent.contains("\ntokens:") {
                    AuthorizedTokensWithMints::Specific(mints)
                } else {
                    AuthorizedTokensWithMints::All
                };
                let record = SessionAccountData::new_active(
                    self.sponsor,
                    0,
                    ActiveSessionInfoV4 {
                        domain_hash: address::domain_hash(&intent_value(&intent, "domain")),
                        user,
                        expiration: DateTime::parse_from_rfc3339(&intent_value(&intent, "expires"))
                            .unwrap()
                            .timestamp(),
                        authorized_programs: AuthorizedPrograms::All,
                        authorized_tokens,
                        extra: Vec::new(),
                    },
                )
                .encode()
                .unwrap();
                self.ledger
                    .accounts
                    .insert(session, owned_account(SESSION_MANAGER_PROGRAM_ID, record));
            } else if ix.data == instruction_discriminator("revoke_session") {
                self.ledger.accounts.remove(&keys[ix.accounts[0] as usize]);
            }
        }
    }
}

fn intent_value(intent: &str, key: &str) -> String {
    let prefix = format!("{key}: ");
    intent
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .unwrap()
        .to_string()
}

#[async_trait]
impl Relay for FakeRelay {
    async fn sponsor_address(&self, _domain: &str) -> Result<Pubkey> {
        Ok(self.sponsor)
    }

    async fn send(&self, transaction: &Transaction, _domain: &str) -> Result<TransactionResult> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.sent.lock().unwrap().push(transaction.clone());

        let signature = Signature::new_unique();
        let mode = *self.mode.lock().unwrap();
        match mode {
            RelayMode::Succeed => {
                self.apply(transaction);
                Ok(TransactionResult::Success { signature })
            }
            RelayMode::FailOnChain => Ok(TransactionResult::Failed {
                signature: Some(signature),
                error: serde_json::json!({ "InstructionError": [1, { "Custom": 6000 }] }),
            }),
            RelayMode::HttpStatus(status) => Err(SessionError::PaymasterResponseError {
                status,
                body: "relay unavailable".to_string(),
                signature: None,
            }),
        }
    }
}

// ================================
// Wallet
// ================================

/// Keypair wallet whose calls can be held open
pub struct GatedWallet {
    inner: KeypairWallet,
    pub connect_gate: Option<Arc<Notify>>,
    pub sign_gate: Option<Arc<Notify>>,
    pub sign_requests: Mutex<usize>,
}

impl GatedWallet {
    pub fn new(inner: KeypairWallet) -> Self {
        Self {
            inner,
            connect_gate: None,
            sign_gate: None,
            sign_requests: Mutex::new(0),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.inner.pubkey()
    }
}

#[async_trait]
impl WalletSigner for GatedWallet {
    fn name(&self) -> String {
        "gated".to_string()
    }

    async fn connect(&self) -> std::result::Result<Pubkey, WalletError> {
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        self.inner.connect().await
    }

    async fn sign_message(&self, message: &[u8]) -> std::result::Result<Signature, WalletError> {
        *self.sign_requests.lock().unwrap() += 1;
        if let Some(gate) = &self.sign_gate {
            gate.notified().await;
        }
        self.inner.sign_message(message).await
    }
}

// ================================
// Harness
// ================================

pub struct Harness {
    pub config: SessionConfig,
    pub ledger: Arc<FakeLedger>,
    pub relay: Arc<FakeRelay>,
    pub store: Arc<InMemorySessionStore>,
    pub clock: Arc<ManualClock>,
    pub manager: Arc<SessionManager>,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(FakeLedger::default());
        let relay = Arc::new(FakeRelay::new(ledger.clone()));
        Self::with_relay(ledger, relay)
    }

    pub fn with_relay(ledger: Arc<FakeLedger>, relay: Arc<FakeRelay>) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let config = SessionConfig::new("localnet", "https://app.example", "http://relay");
        let manager = Self::manager_for(&config, &ledger, &relay, &store, &clock);
        Self {
            config,
            ledger,
            relay,
            store,
            clock,
            manager,
        }
    }

    /// Another client sharing this harness's ledger, relay and store
    pub fn second_manager(&self) -> Arc<SessionManager> {
        Self::manager_for(&self.config, &self.ledger, &self.relay, &self.store, &self.clock)
    }

    fn manager_for(
        config: &SessionConfig,
        ledger: &Arc<FakeLedger>,
        relay: &Arc<FakeRelay>,
        store: &Arc<InMemorySessionStore>,
        clock: &Arc<ManualClock>,
    ) -> Arc<SessionManager> {
        Arc::new(
            SessionManager::new(
                config.clone(),
                ledger.clone(),
                relay.clone(),
                store.clone(),
            )
            .with_clock(clock.clone()),
        )
    }
}

pub fn keypair_wallet() -> (WalletHandle, Pubkey) {
    let wallet = KeypairWallet::new(Keypair::new());
    let address = wallet.pubkey();
    (Arc::new(wallet), address)
}
