//! Sessions SDK
//!
//! Client side of delegated session authorization: a wallet signs a human-readable
//! intent once, a short-lived session key acts within the granted scope afterwards,
//! and a sponsoring relay pays the fees.

// ================================
// Module Declarations
// ================================

pub mod core;

// Encoding and verification primitives
pub mod address;
pub mod amount;
pub mod intent;
pub mod layout;
pub mod verify;

// Collaborator seams
pub mod cache;
pub mod clock;
pub mod ledger;
pub mod store;
pub mod wallet;

// Protocol flows
pub mod login;
pub mod relay;
pub mod session;
pub mod transaction;
pub mod transfer;

// ================================
// Public API Re-exports
// ================================

// Configuration and errors
pub use core::{
    Result, SessionConfig, SessionError, DOMAIN_REGISTRY_PROGRAM_ID, INTENT_TRANSFER_PROGRAM_ID,
    SESSION_MANAGER_PROGRAM_ID,
};
pub use amount::AmountError;
pub use intent::{Intent, IntentBuilder, IntentError};
pub use layout::LayoutError;
pub use wallet::{KeypairWallet, WalletError, WalletHandle, WalletSigner};

// Seams
pub use cache::DecimalsCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{owned_account, Ledger, RpcLedger};
pub use store::{InMemorySessionStore, SessionStore};

// Flows
pub use login::{create_login_token, verify_login_token, LoginClaims, LoginVerifier};
pub use relay::{HttpRelay, Relay, TransactionResult};
pub use session::{
    EstablishedSession, Session, SessionInfo, SessionLimits, SessionManager, SessionState,
    UpdateOrigin,
};
pub use transfer::IntentTransferClient;
pub use verify::{verify_signature, SignedEncoding, VerifiedMessage};
