//! Session types and lifecycle states

mod manager;

pub use manager::SessionManager;

use crate::layout::session::ExtraEntries;
use crate::layout::{AuthorizedPrograms, AuthorizedTokensWithMints, SessionAccount};
use crate::wallet::WalletHandle;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ================================
// Session Data
// ================================

/// What the on-chain record grants the session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub major: u8,
    pub minor: u8,
    /// Unix seconds
    pub expiration: i64,
    pub authorized_programs: AuthorizedPrograms,
    pub authorized_tokens: AuthorizedTokensWithMints,
    pub extra: ExtraEntries,
}

impl From<&SessionAccount> for SessionInfo {
    fn from(account: &SessionAccount) -> Self {
        Self {
            major: account.major,
            minor: account.minor,
            expiration: account.expiration,
            authorized_programs: account.authorized_programs.clone(),
            authorized_tokens: account.authorized_tokens.clone(),
            extra: account.extra.clone(),
        }
    }
}

/// A live session. The keypair never leaves this process.
pub struct Session {
    pub session_keypair: Arc<Keypair>,
    pub session_public_address: Pubkey,
    pub wallet_public_address: Pubkey,
    pub sponsor: Pubkey,
    pub session_info: SessionInfo,
}

impl Session {
    /// Past expiration, using the same `expiration < now` rule as the ledger
    pub fn is_expired(&self, now: i64) -> bool {
        self.session_info.expiration < now
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_public_address", &self.session_public_address)
            .field("wallet_public_address", &self.wallet_public_address)
            .field("sponsor", &self.sponsor)
            .field("session_info", &self.session_info)
            .finish_non_exhaustive()
    }
}

/// Spending limits requested for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLimits {
    /// Every token the wallet holds, no per-mint cap
    Unlimited,
    /// Base-unit cap per mint
    Tokens(BTreeMap<Pubkey, u64>),
}

impl SessionLimits {
    pub fn mints(&self) -> Vec<Pubkey> {
        match self {
            Self::Unlimited => vec![],
            Self::Tokens(limits) => limits.keys().copied().collect(),
        }
    }

    /// Cap for `mint`; `None` means uncapped, `Some(0)` means not authorized
    pub fn limit_for(&self, mint: &Pubkey) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Tokens(limits) => Some(limits.get(mint).copied().unwrap_or(0)),
        }
    }

    /// These limits with `mint` raised to at least `amount`
    pub fn raised(&self, mint: Pubkey, amount: u64) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Tokens(limits) => {
                let mut limits = limits.clone();
                let entry = limits.entry(mint).or_insert(0);
                *entry = (*entry).max(amount);
                Self::Tokens(limits)
            }
        }
    }
}

/// Session plus the wallet and limits it was established with
#[derive(Clone)]
pub struct EstablishedSession {
    pub session: Arc<Session>,
    pub wallet: WalletHandle,
    pub limits: SessionLimits,
}

impl fmt::Debug for EstablishedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstablishedSession")
            .field("session", &self.session)
            .field("wallet", &self.wallet.name())
            .field("limits", &self.limits)
            .finish()
    }
}

// ================================
// Lifecycle States
// ================================

/// Renewal path an update started from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    Established,
    RequestingExtendedExpiry,
    RequestingIncreasedLimits,
}

#[derive(Clone)]
pub enum SessionState {
    Initializing,
    CheckingStoredSession,
    NotEstablished,
    SelectingWallet,
    WalletConnecting {
        wallet: WalletHandle,
    },
    RequestingLimits {
        wallet: WalletHandle,
        wallet_address: Pubkey,
    },
    SettingLimits {
        wallet: WalletHandle,
        wallet_address: Pubkey,
        limits: SessionLimits,
        dispatched: bool,
    },
    Established(EstablishedSession),
    UpdatingSession {
        previous: UpdateOrigin,
        session: EstablishedSession,
    },
    RequestingExtendedExpiry(EstablishedSession),
    RequestingIncreasedLimits {
        session: EstablishedSession,
        requested: SessionLimits,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::CheckingStoredSession => "CheckingStoredSession",
            Self::NotEstablished => "NotEstablished",
            Self::SelectingWallet => "SelectingWallet",
            Self::WalletConnecting { .. } => "WalletConnecting",
            Self::RequestingLimits { .. } => "RequestingLimits",
            Self::SettingLimits { .. } => "SettingLimits",
            Self::Established(_) => "Established",
            Self::UpdatingSession { .. } => "UpdatingSession",
            Self::RequestingExtendedExpiry(_) => "RequestingExtendedExpiry",
            Self::RequestingIncreasedLimits { .. } => "RequestingIncreasedLimits",
        }
    }

    /// Some flow is between its first and last step
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::NotEstablished | Self::Established(_))
    }

    pub fn is_cancelable(&self) -> bool {
        match self {
            Self::SelectingWallet
            | Self::WalletConnecting { .. }
            | Self::RequestingLimits { .. }
            | Self::RequestingExtendedExpiry(_)
            | Self::RequestingIncreasedLimits { .. } => true,
            Self::SettingLimits { dispatched, .. } => !dispatched,
            _ => false,
        }
    }

    /// The live session, in `Established` and its sub-states
    pub fn established(&self) -> Option<&EstablishedSession> {
        match self {
            Self::Established(session)
            | Self::UpdatingSession { session, .. }
            | Self::RequestingExtendedExpiry(session)
            | Self::RequestingIncreasedLimits { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.established().map(|established| &established.session)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WalletConnecting { wallet } => f
                .debug_struct("WalletConnecting")
                .field("wallet", &wallet.name())
                .finish(),
            Self::RequestingLimits { wallet_address, .. } => f
                .debug_struct("RequestingLimits")
                .field("wallet_address", wallet_address)
                .finish_non_exhaustive(),
            Self::SettingLimits {
                wallet_address,
                limits,
                dispatched,
                ..
            } => f
                .debug_struct("SettingLimits")
                .field("wallet_address", wallet_address)
                .field("limits", limits)
                .field("dispatched", dispatched)
                .finish_non_exhaustive(),
            Self::Established(session) => f.debug_tuple("Established").field(session).finish(),
            Self::UpdatingSession { previous, session } => f
                .debug_struct("UpdatingSession")
                .field("previous", previous)
                .field("session", session)
                .finish(),
            Self::RequestingExtendedExpiry(session) => f
                .debug_tuple("RequestingExtendedExpiry")
                .field(session)
                .finish(),
            Self::RequestingIncreasedLimits { session, requested } => f
                .debug_struct("RequestingIncreasedLimits")
                .field("session", session)
                .field("requested", requested)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}
