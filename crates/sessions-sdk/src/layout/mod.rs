//! Binary layouts of the on-chain records the client reads
//!
//! Every decoder is discriminator-first and fail-closed: an unknown tag is an error,
//! never a best guess.

pub mod domain;
pub mod nonce;
pub mod session;
pub mod token;

pub use domain::DomainRecord;
pub use nonce::NonceAccount;
pub use session::{
    decode_session, ActiveSessionInfoV1, ActiveSessionInfoV3, ActiveSessionInfoV4,
    AuthorizedProgram, AuthorizedPrograms, AuthorizedTokens, AuthorizedTokensWithMints,
    RecordStatus, SessionAccount, SessionAccountData, SessionRecord,
    CURRENT_SESSION_GENERATION,
};
pub use token::{Mint, TokenAccount, TokenAccountState};

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_error::ProgramError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("{account} data is {len} bytes, expected at least {expected}")]
    TooShort {
        account: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("{account} discriminator mismatch")]
    Discriminator { account: &'static str },

    #[error("unknown session record generation {0}")]
    UnknownGeneration(u8),

    #[error("unknown session status tag {0}")]
    UnknownStatus(u8),

    #[error("domain record is {0} bytes, not a whole number of entries")]
    DomainRecordLength(usize),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    #[error("malformed record body: {0}")]
    Body(#[from] std::io::Error),

    #[error("invalid token program account: {0}")]
    Token(#[from] ProgramError),

    #[error("malformed parsed token account: {0}")]
    ParsedTokenAccount(String),

    #[error("{account} account {address} is owned by {owner}, expected {expected}")]
    WrongOwner {
        account: &'static str,
        address: Pubkey,
        owner: Pubkey,
        expected: Pubkey,
    },
}

/// First eight bytes of `sha256("account:<name>")`
pub fn account_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("account:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// First eight bytes of `sha256("global:<name>")`
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Split off and check an account discriminator
pub(crate) fn strip_discriminator<'a>(
    data: &'a [u8],
    account: &'static str,
) -> Result<&'a [u8], LayoutError> {
    if data.len() < 8 {
        return Err(LayoutError::TooShort {
            account,
            len: data.len(),
            expected: 8,
        });
    }
    let (discriminator, rest) = data.split_at(8);
    if discriminator != account_discriminator(account) {
        return Err(LayoutError::Discriminator { account });
    }
    Ok(rest)
}

pub(crate) fn ensure_consumed(rest: &[u8]) -> Result<(), LayoutError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(LayoutError::TrailingBytes(rest.len()))
    }
}
