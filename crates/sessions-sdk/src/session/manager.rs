//! Session lifecycle driver
//!
//! Every transition is a check-and-set under a short lock that is never held across an
//! await. Each transition bumps an epoch; a flow that resumes after an await and finds
//! a different epoch was canceled (or superseded) and stops without further effect.

use super::{EstablishedSession, Session, SessionInfo, SessionLimits, SessionState, UpdateOrigin};
use crate::amount::string_to_token_amount;
use crate::cache::DecimalsCache;
use crate::clock::{Clock, SystemClock};
use crate::core::SessionConfig;
use crate::intent::{compose_session_intent, SessionIntentParams, TokenLines};
use crate::layout::token::allowance_for;
use crate::layout::{AuthorizedTokensWithMints, SessionAccount};
use crate::ledger::{fetch_domain_record, fetch_session, Ledger};
use crate::relay::Relay;
use crate::store::SessionStore;
use crate::transaction::{
    ed25519_verify_instruction, revoke_session_instruction, start_session_instruction,
    TransactionBuilder,
};
use crate::verify::verify_signature;
use crate::wallet::WalletHandle;
use crate::{address, Result, SessionError};
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Inner {
    state: SessionState,
    epoch: u64,
}

/// Drives one client's session through its lifecycle
pub struct SessionManager {
    config: SessionConfig,
    ledger: Arc<dyn Ledger>,
    relay: Arc<dyn Relay>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    decimals: DecimalsCache,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn Relay>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Initializing);
        Self {
            config,
            ledger,
            relay,
            store,
            clock: Arc::new(SystemClock),
            decimals: DecimalsCache::new(),
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                epoch: 0,
            }),
            state_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a decimals cache with other clients of the same network
    pub fn with_decimals_cache(mut self, decimals: DecimalsCache) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ================================
    // Observation
    // ================================

    /// Current state; an `Established` session past its expiration is moved to
    /// `RequestingExtendedExpiry` first
    pub fn state(&self) -> SessionState {
        let mut inner = self.lock();
        self.expire_lapsed(&mut inner);
        inner.state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    // ================================
    // Establishment
    // ================================

    /// Leave `Initializing`, resuming a stored session for `wallet` when one is live
    pub async fn initialize(&self, wallet: Option<WalletHandle>) -> Result<SessionState> {
        let (epoch, ()) = self.begin("initialize", |state| match state {
            SessionState::Initializing => Some((SessionState::CheckingStoredSession, ())),
            _ => None,
        })?;

        let restored = match wallet {
            Some(wallet) => match self.restore(&wallet).await {
                Ok(restored) => restored,
                Err(e) => {
                    warn!(error = %e, "stored session check failed");
                    None
                }
            },
            None => None,
        };

        let next = restored.map_or(SessionState::NotEstablished, SessionState::Established);
        self.advance(epoch, next.clone())?;
        Ok(next)
    }

    pub fn select_wallet(&self) -> Result<()> {
        self.begin("select_wallet", |state| match state {
            SessionState::NotEstablished => Some((SessionState::SelectingWallet, ())),
            _ => None,
        })?;
        Ok(())
    }

    /// Connect the selected wallet. Returns `Established` when the wallet already has a
    /// live stored session, `RequestingLimits` otherwise.
    pub async fn connect_wallet(&self, wallet: WalletHandle) -> Result<SessionState> {
        let (epoch, ()) = self.begin("connect_wallet", |state| match state {
            SessionState::SelectingWallet => Some((
                SessionState::WalletConnecting {
                    wallet: wallet.clone(),
                },
                (),
            )),
            _ => None,
        })?;

        let wallet_address = match wallet.connect().await {
            Ok(address) => address,
            Err(e) => return Err(self.fail(epoch, SessionState::NotEstablished, e.into())),
        };
        self.ensure_current(epoch)?;
        info!(wallet = %wallet_address, backend = %wallet.name(), "wallet connected");

        let restored = match self.restore_for(&wallet, wallet_address).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(wallet = %wallet_address, error = %e, "stored session check failed");
                None
            }
        };

        let next = match restored {
            Some(established) => SessionState::Established(established),
            None => SessionState::RequestingLimits {
                wallet,
                wallet_address,
            },
        };
        self.advance(epoch, next.clone())?;
        Ok(next)
    }

    /// Sign and submit a new session with `limits` for the connected wallet
    pub async fn set_limits(&self, limits: SessionLimits) -> Result<Arc<Session>> {
        let (epoch, (wallet, wallet_address)) = self.begin("set_limits", |state| match state {
            SessionState::RequestingLimits {
                wallet,
                wallet_address,
            } => Some((
                SessionState::SettingLimits {
                    wallet: wallet.clone(),
                    wallet_address: *wallet_address,
                    limits: limits.clone(),
                    dispatched: false,
                },
                (wallet.clone(), *wallet_address),
            )),
            _ => None,
        })?;

        let fallback = SessionState::RequestingLimits {
            wallet: wallet.clone(),
            wallet_address,
        };
        match self
            .create_session(epoch, &wallet, wallet_address, &limits, true)
            .await
        {
            Ok(established) => {
                let session = established.session.clone();
                self.advance(epoch, SessionState::Established(established))?;
                Ok(session)
            }
            Err(e) => Err(self.fail(epoch, fallback, e)),
        }
    }

    /// Run the whole flow from `NotEstablished` to `Established`
    pub async fn establish_session(
        &self,
        wallet: WalletHandle,
        limits: SessionLimits,
    ) -> Result<Arc<Session>> {
        self.select_wallet()?;
        match self.connect_wallet(wallet).await? {
            SessionState::Established(established) => Ok(established.session),
            _ => self.set_limits(limits).await,
        }
    }

    // ================================
    // Renewal
    // ================================

    /// Replace a live session in place, optionally with new limits
    pub async fn update_session(&self, limits: Option<SessionLimits>) -> Result<Arc<Session>> {
        self.live_session("update_session")?;
        let (epoch, current) = self.begin("update_session", |state| match state {
            SessionState::Established(session) => Some((
                SessionState::UpdatingSession {
                    previous: UpdateOrigin::Established,
                    session: session.clone(),
                },
                session.clone(),
            )),
            _ => None,
        })?;

        let limits = limits.unwrap_or_else(|| current.limits.clone());
        let fallback = SessionState::Established(current.clone());
        self.replace_session(epoch, current, limits, fallback).await
    }

    pub fn request_extended_expiry(&self) -> Result<()> {
        self.begin("request_extended_expiry", |state| match state {
            SessionState::Established(session) => {
                Some((SessionState::RequestingExtendedExpiry(session.clone()), ()))
            }
            _ => None,
        })?;
        Ok(())
    }

    /// Renew the session for another full duration with its current limits
    pub async fn confirm_extended_expiry(&self) -> Result<Arc<Session>> {
        let (epoch, current) = self.begin("confirm_extended_expiry", |state| match state {
            SessionState::RequestingExtendedExpiry(session) => Some((
                SessionState::UpdatingSession {
                    previous: UpdateOrigin::RequestingExtendedExpiry,
                    session: session.clone(),
                },
                session.clone(),
            )),
            _ => None,
        })?;

        let limits = current.limits.clone();
        let fallback = SessionState::RequestingExtendedExpiry(current.clone());
        self.replace_session(epoch, current, limits, fallback).await
    }

    pub fn request_increased_limits(&self, requested: SessionLimits) -> Result<()> {
        self.begin("request_increased_limits", |state| match state {
            SessionState::Established(session) => Some((
                SessionState::RequestingIncreasedLimits {
                    session: session.clone(),
                    requested: requested.clone(),
                },
                (),
            )),
            _ => None,
        })?;
        Ok(())
    }

    /// Renew the session with the requested limits
    pub async fn confirm_increased_limits(&self) -> Result<Arc<Session>> {
        let (epoch, (current, requested)) =
            self.begin("confirm_increased_limits", |state| match state {
                SessionState::RequestingIncreasedLimits { session, requested } => Some((
                    SessionState::UpdatingSession {
                        previous: UpdateOrigin::RequestingIncreasedLimits,
                        session: session.clone(),
                    },
                    (session.clone(), requested.clone()),
                )),
                _ => None,
            })?;

        let fallback = SessionState::RequestingIncreasedLimits {
            session: current.clone(),
            requested: requested.clone(),
        };
        self.replace_session(epoch, current, requested, fallback).await
    }

    /// Check a planned spend against the session's limits. Exceeding them moves the
    /// machine to `RequestingIncreasedLimits` with the limit raised to `amount`.
    pub fn ensure_spend_allowed(&self, mint: &Pubkey, amount: u64) -> Result<()> {
        let current = self.live_session("ensure_spend_allowed")?;
        let Some(limit) = current.limits.limit_for(mint) else {
            return Ok(());
        };
        if amount <= limit {
            return Ok(());
        }

        let mut inner = self.lock();
        if let SessionState::Established(session) = &inner.state {
            let next = SessionState::RequestingIncreasedLimits {
                session: session.clone(),
                requested: session.limits.raised(*mint, amount),
            };
            self.set(&mut inner, next);
        }
        Err(SessionError::LimitExceeded {
            mint: *mint,
            requested: amount,
            limit,
        })
    }

    // ================================
    // Cancellation and Teardown
    // ================================

    /// Abandon the pending step. Establishment steps fall back to `NotEstablished`,
    /// renewal requests to `Established`.
    pub fn cancel(&self) -> Result<SessionState> {
        let mut inner = self.lock();
        let next = match &inner.state {
            SessionState::SelectingWallet
            | SessionState::WalletConnecting { .. }
            | SessionState::RequestingLimits { .. }
            | SessionState::SettingLimits {
                dispatched: false,
                ..
            } => SessionState::NotEstablished,
            SessionState::RequestingExtendedExpiry(session)
            | SessionState::RequestingIncreasedLimits { session, .. } => {
                SessionState::Established(session.clone())
            }
            other => {
                return Err(SessionError::NotCancelable {
                    state: other.name(),
                })
            }
        };

        info!(from = inner.state.name(), to = next.name(), "session operation canceled");
        self.set(&mut inner, next.clone());
        Ok(next)
    }

    /// Log out: drop the session locally, revoke it on-chain if the relay allows, and
    /// forget the stored key
    pub async fn end_session(&self) -> Result<()> {
        let (_, current) = self.begin("end_session", |state| match state {
            SessionState::Established(session)
            | SessionState::RequestingExtendedExpiry(session)
            | SessionState::RequestingIncreasedLimits { session, .. } => {
                Some((SessionState::NotEstablished, session.clone()))
            }
            _ => None,
        })?;

        let session = &current.session;
        match self.revoke(session).await {
            Ok(signature) => info!(session = %session.session_public_address, %signature, "session revoked"),
            Err(e) => warn!(session = %session.session_public_address, error = %e, "session revoke failed"),
        }
        if let Err(e) = self.store.clear(&session.wallet_public_address).await {
            warn!(wallet = %session.wallet_public_address, error = %e, "failed to clear stored session");
        }
        Ok(())
    }

    // ================================
    // Session Use
    // ================================

    /// Sign `instructions` with the session key and submit them through the relay
    pub async fn send_transaction(&self, instructions: Vec<Instruction>) -> Result<Signature> {
        let current = self.live_session("send_transaction")?;
        let session = &current.session;

        let blockhash = self.ledger.get_latest_blockhash().await?;
        let transaction = TransactionBuilder::new(session.sponsor)
            .add_instructions(instructions)
            .build(blockhash, &[session.session_keypair.as_ref()])?;

        let signature = self
            .relay
            .send(&transaction, &self.config.domain)
            .await?
            .into_result()?;
        debug!(session = %session.session_public_address, %signature, "session transaction confirmed");
        Ok(signature)
    }

    /// Parse a user-entered amount of `mint` into base units
    pub async fn parse_amount(&self, mint: &Pubkey, text: &str) -> Result<u64> {
        let decimals = self
            .decimals
            .get_or_fetch(self.ledger.as_ref(), &self.config.chain_id, mint)
            .await?;
        Ok(string_to_token_amount(text, u32::from(decimals))?)
    }

    // ================================
    // Internal Flows
    // ================================

    async fn restore(&self, wallet: &WalletHandle) -> Result<Option<EstablishedSession>> {
        let wallet_address = wallet.connect().await?;
        self.restore_for(wallet, wallet_address).await
    }

    /// A stored session that is still live on-chain for `wallet_address`
    async fn restore_for(
        &self,
        wallet: &WalletHandle,
        wallet_address: Pubkey,
    ) -> Result<Option<EstablishedSession>> {
        let Some(session_key) = self.store.load(&wallet_address).await? else {
            return Ok(None);
        };
        let session_address = session_key.pubkey();

        let account = fetch_session(
            self.ledger.as_ref(),
            &session_address,
            &self.config.session_manager_program,
        )
        .await?;
        let Some(account) = account.filter(|account| self.is_usable(account, &wallet_address))
        else {
            debug!(wallet = %wallet_address, session = %session_address, "stored session is no longer live");
            self.store.clear(&wallet_address).await?;
            return Ok(None);
        };

        let limits = self
            .delegated_limits(&wallet_address, &session_address, &account.authorized_tokens)
            .await?;
        info!(wallet = %wallet_address, session = %session_address, "restored stored session");

        Ok(Some(EstablishedSession {
            session: Arc::new(Session {
                session_keypair: Arc::new(session_key),
                session_public_address: session_address,
                wallet_public_address: wallet_address,
                sponsor: account.sponsor,
                session_info: SessionInfo::from(&account),
            }),
            wallet: wallet.clone(),
            limits,
        }))
    }

    fn is_usable(&self, account: &SessionAccount, wallet_address: &Pubkey) -> bool {
        let domain_matches = account
            .domain_hash
            .map_or(true, |hash| hash == address::domain_hash(&self.config.domain));
        account.user == *wallet_address && !account.is_expired(self.clock.now()) && domain_matches
    }

    /// Remaining per-mint allowance delegated to the session key
    async fn delegated_limits(
        &self,
        wallet_address: &Pubkey,
        session_address: &Pubkey,
        tokens: &AuthorizedTokensWithMints,
    ) -> Result<SessionLimits> {
        let AuthorizedTokensWithMints::Specific(mints) = tokens else {
            return Ok(SessionLimits::Unlimited);
        };

        let accounts = self.ledger.get_token_accounts_by_owner(wallet_address).await?;
        let limits = mints
            .iter()
            .map(|mint| {
                let allowance = accounts
                    .iter()
                    .filter(|(_, account)| &account.mint == mint)
                    .fold(0u64, |total, (_, account)| {
                        total.saturating_add(allowance_for(account, session_address))
                    });
                (*mint, allowance)
            })
            .collect();
        Ok(SessionLimits::Tokens(limits))
    }

    /// Token lines for the intent, with decimals from the mint accounts
    async fn token_lines(&self, limits: &SessionLimits) -> Result<Option<TokenLines>> {
        let SessionLimits::Tokens(limits) = limits else {
            return Ok(None);
        };

        let mut lines = TokenLines::new();
        for (mint, amount) in limits {
            let decimals = self
                .decimals
                .get_or_fetch(self.ledger.as_ref(), &self.config.chain_id, mint)
                .await?;
            lines.insert(*mint, (*amount, u32::from(decimals)));
        }
        Ok(Some(lines))
    }

    /// Create a fresh session key and get it authorized on-chain.
    ///
    /// Nothing leaves the client before the wallet signs. `mark_dispatch` records the
    /// point of no return in `SettingLimits`.
    async fn create_session(
        &self,
        epoch: u64,
        wallet: &WalletHandle,
        wallet_address: Pubkey,
        limits: &SessionLimits,
        mark_dispatch: bool,
    ) -> Result<EstablishedSession> {
        let session_key = Keypair::new();
        let session_address = session_key.pubkey();

        let sponsor = self.relay.sponsor_address(&self.config.domain).await?;
        let domain_record = fetch_domain_record(
            self.ledger.as_ref(),
            &self.config.domain,
            &self.config.domain_registry_program,
        )
        .await?;
        let tokens = self.token_lines(limits).await?;
        let expiration = self
            .clock
            .now()
            .saturating_add(self.config.session_duration_secs());

        let intent = compose_session_intent(&SessionIntentParams {
            version: self.config.version_string(),
            chain_id: &self.config.chain_id,
            domain: &self.config.domain,
            expires: expiration,
            session_key: session_address,
            tokens: tokens.as_ref(),
            extra: &self.config.extra,
        })?;
        let message = intent.to_bytes();

        self.ensure_current(epoch)?;
        debug!(wallet = %wallet_address, session = %session_address, "requesting intent signature");
        let signature = wallet.sign_message(&message).await?;
        self.ensure_current(epoch)?;
        let verified = verify_signature(&wallet_address, &signature, &message)?;

        let blockhash = self.ledger.get_latest_blockhash().await?;
        let transaction = TransactionBuilder::new(sponsor)
            .add_instruction(ed25519_verify_instruction(&verified)?)
            .add_instruction(start_session_instruction(
                &self.config,
                &sponsor,
                &session_address,
                &wallet_address,
                &limits.mints(),
            ))
            .build(blockhash, &[&session_key])?;

        if mark_dispatch {
            self.mark_dispatched(epoch)?;
        } else {
            self.ensure_current(epoch)?;
        }
        let signature = self
            .relay
            .send(&transaction, &self.config.domain)
            .await?
            .into_result()?;
        info!(
            wallet = %wallet_address,
            session = %session_address,
            %signature,
            expiration,
            "session established"
        );

        // The session is live on-chain from here; a lost key only costs the resume
        if let Err(e) = self.store.save(&wallet_address, &session_key).await {
            warn!(
                wallet = %wallet_address,
                session = %session_address,
                error = %e,
                "failed to persist session key"
            );
        }

        let authorized_tokens = match limits {
            SessionLimits::Unlimited => AuthorizedTokensWithMints::All,
            SessionLimits::Tokens(_) => AuthorizedTokensWithMints::Specific(limits.mints()),
        };
        Ok(EstablishedSession {
            session: Arc::new(Session {
                session_keypair: Arc::new(session_key),
                session_public_address: session_address,
                wallet_public_address: wallet_address,
                sponsor,
                session_info: SessionInfo {
                    major: self.config.major_version,
                    minor: self.config.minor_version,
                    expiration,
                    authorized_programs: domain_record.authorized_programs(),
                    authorized_tokens,
                    extra: self.config.extra.clone().into_iter().collect(),
                },
            }),
            wallet: wallet.clone(),
            limits: limits.clone(),
        })
    }

    /// Renewal: a new key replaces the current one, which is then revoked
    async fn replace_session(
        &self,
        epoch: u64,
        current: EstablishedSession,
        limits: SessionLimits,
        fallback: SessionState,
    ) -> Result<Arc<Session>> {
        let wallet_address = current.session.wallet_public_address;
        let renewed = match self
            .create_session(epoch, &current.wallet, wallet_address, &limits, false)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => return Err(self.fail(epoch, fallback, e)),
        };

        let session = renewed.session.clone();
        self.advance(epoch, SessionState::Established(renewed))?;

        if let Err(e) = self.revoke(&current.session).await {
            warn!(
                session = %current.session.session_public_address,
                error = %e,
                "failed to revoke replaced session"
            );
        }
        Ok(session)
    }

    async fn revoke(&self, session: &Session) -> Result<Signature> {
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let transaction = TransactionBuilder::new(session.sponsor)
            .add_instruction(revoke_session_instruction(
                &self.config,
                &session.session_public_address,
                &session.sponsor,
            ))
            .build(blockhash, &[session.session_keypair.as_ref()])?;
        self.relay
            .send(&transaction, &self.config.domain)
            .await?
            .into_result()
    }

    // ================================
    // State Bookkeeping
    // ================================

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, inner: &mut Inner, state: SessionState) -> u64 {
        debug!(from = inner.state.name(), to = state.name(), "session state transition");
        inner.epoch += 1;
        inner.state = state.clone();
        self.state_tx.send_replace(state);
        inner.epoch
    }

    fn rejection(operation: &'static str, state: &SessionState) -> SessionError {
        if state.is_busy() {
            SessionError::AlreadyInProgress {
                state: state.name(),
            }
        } else {
            SessionError::InvalidState {
                operation,
                state: state.name(),
            }
        }
    }

    /// Start a flow if `next` accepts the current state
    fn begin<T>(
        &self,
        operation: &'static str,
        next: impl FnOnce(&SessionState) -> Option<(SessionState, T)>,
    ) -> Result<(u64, T)> {
        let mut inner = self.lock();
        match next(&inner.state) {
            Some((state, value)) => Ok((self.set(&mut inner, state), value)),
            None => Err(Self::rejection(operation, &inner.state)),
        }
    }

    /// Move an in-flight flow on, unless it was canceled
    fn advance(&self, epoch: u64, state: SessionState) -> Result<u64> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Err(SessionError::Canceled);
        }
        Ok(self.set(&mut inner, state))
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.lock().epoch == epoch {
            Ok(())
        } else {
            Err(SessionError::Canceled)
        }
    }

    fn mark_dispatched(&self, epoch: u64) -> Result<()> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Err(SessionError::Canceled);
        }
        if let SessionState::SettingLimits { dispatched, .. } = &mut inner.state {
            *dispatched = true;
        }
        self.state_tx.send_replace(inner.state.clone());
        Ok(())
    }

    /// Fall back after a failed flow; a flow canceled meanwhile reports `Canceled`
    fn fail(&self, epoch: u64, fallback: SessionState, error: SessionError) -> SessionError {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return SessionError::Canceled;
        }
        warn!(state = inner.state.name(), error = %error, "session operation failed");
        self.set(&mut inner, fallback);
        error
    }

    fn expire_lapsed(&self, inner: &mut Inner) {
        if let SessionState::Established(session) = &inner.state {
            if session.session.is_expired(self.clock.now()) {
                info!(
                    session = %session.session.session_public_address,
                    expiration = session.session.session_info.expiration,
                    "session expired"
                );
                let next = SessionState::RequestingExtendedExpiry(session.clone());
                self.set(inner, next);
            }
        }
    }

    /// The established session, if it is still within its lifetime
    fn live_session(&self, operation: &'static str) -> Result<EstablishedSession> {
        let mut inner = self.lock();
        self.expire_lapsed(&mut inner);
        match &inner.state {
            SessionState::Established(session) => Ok(session.clone()),
            SessionState::RequestingExtendedExpiry(session)
                if session.session.is_expired(self.clock.now()) =>
            {
                Err(SessionError::SessionExpired {
                    expiration: session.session.session_info.expiration,
                })
            }
            other => Err(Self::rejection(operation, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MockLedger;
    use crate::relay::MockRelay;
    use crate::relay::TransactionResult;
    use crate::store::{InMemorySessionStore, MockSessionStore};
    use crate::wallet::{KeypairWallet, MockWalletSigner};
    use crate::IntentError;
    use solana_sdk::hash::Hash;

    fn manager(config: SessionConfig, wallet_calls: usize) -> (SessionManager, WalletHandle) {
        let mut ledger = MockLedger::new();
        ledger.expect_get_account().returning(|_| Ok(None));
        ledger
            .expect_get_latest_blockhash()
            .returning(|| Ok(Hash::new_unique()));

        let mut relay = MockRelay::new();
        relay
            .expect_sponsor_address()
            .returning(|_| Ok(Pubkey::new_unique()));

        let wallet_address = Pubkey::new_unique();
        let mut wallet = MockWalletSigner::new();
        wallet.expect_name().returning(|| "mock".to_string());
        wallet
            .expect_connect()
            .returning(move || Ok(wallet_address));
        wallet.expect_sign_message().times(wallet_calls).returning(|_| {
            Err(crate::WalletError::Rejected("declined".to_string()))
        });

        let manager = SessionManager::new(
            config,
            Arc::new(ledger),
            Arc::new(relay),
            Arc::new(InMemorySessionStore::new()),
        )
        .with_clock(Arc::new(ManualClock::new(1_000)));
        (manager, Arc::new(wallet))
    }

    #[tokio::test]
    async fn test_bad_extra_value_fails_before_signing() {
        let config = SessionConfig::default().with_extra("referrer", "a\nb");
        let (manager, wallet) = manager(config, 0);
        manager.initialize(None).await.unwrap();

        let err = manager
            .establish_session(wallet, SessionLimits::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Intent(IntentError::MultilineValue(_))));
        assert_eq!(manager.state().name(), "RequestingLimits");
    }

    #[tokio::test]
    async fn test_reserved_extra_key_fails_before_signing() {
        let config = SessionConfig::default().with_extra("domain", "evil.example");
        let (manager, wallet) = manager(config, 0);
        manager.initialize(None).await.unwrap();

        let err = manager
            .establish_session(wallet, SessionLimits::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Intent(IntentError::ReservedKey(_))));
    }

    #[tokio::test]
    async fn test_wallet_rejection_returns_to_requesting_limits() {
        let (manager, wallet) = manager(SessionConfig::default(), 1);
        manager.initialize(None).await.unwrap();

        let err = manager
            .establish_session(wallet, SessionLimits::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Wallet(_)));
        assert!(matches!(
            manager.state(),
            SessionState::RequestingLimits { .. }
        ));
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let (manager, _) = manager(SessionConfig::default(), 0);
        assert!(matches!(
            manager.select_wallet(),
            Err(SessionError::AlreadyInProgress {
                state: "Initializing"
            })
        ));
        assert!(matches!(
            manager.cancel(),
            Err(SessionError::NotCancelable {
                state: "Initializing"
            })
        ));
    }

    #[tokio::test]
    async fn test_store_failure_after_dispatch_still_establishes() {
        let mut ledger = MockLedger::new();
        ledger.expect_get_account().returning(|_| Ok(None));
        ledger
            .expect_get_latest_blockhash()
            .returning(|| Ok(Hash::new_unique()));

        let mut relay = MockRelay::new();
        relay
            .expect_sponsor_address()
            .returning(|_| Ok(Pubkey::new_unique()));
        relay.expect_send().times(1).returning(|_, _| {
            Ok(TransactionResult::Success {
                signature: Signature::from([3u8; 64]),
            })
        });

        let mut store = MockSessionStore::new();
        store.expect_load().returning(|_| Ok(None));
        store
            .expect_save()
            .times(1)
            .returning(|_, _| Err(SessionError::Store("disk full".to_string())));

        let manager = SessionManager::new(
            SessionConfig::default(),
            Arc::new(ledger),
            Arc::new(relay),
            Arc::new(store),
        )
        .with_clock(Arc::new(ManualClock::new(1_000)));
        manager.initialize(None).await.unwrap();

        let wallet: WalletHandle = Arc::new(KeypairWallet::new(Keypair::new()));
        let session = manager
            .establish_session(wallet, SessionLimits::Unlimited)
            .await
            .unwrap();
        match manager.state() {
            SessionState::Established(established) => {
                assert_eq!(
                    established.session.session_public_address,
                    session.session_public_address
                );
            }
            other => panic!("unexpected state: {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_multiline_domain_fails_before_signing() {
        let mut config = SessionConfig::default();
        config.domain = "\nsession_key: 11111111111111111111111111111111".to_string();
        let (manager, wallet) = manager(config, 0);
        manager.initialize(None).await.unwrap();

        let err = manager
            .establish_session(wallet, SessionLimits::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Intent(IntentError::MultilineValue(_))));
    }
}
