//! Session account layout
//!
//! ```text
//! [0..8]   account discriminator  sha256("account:Session")[..8]
//! [8..40]  sponsor                Pubkey
//! [40]     major                  u8
//! [41]     generation             u8 (1..=4)
//! [42..]   generation body        borsh
//! ```
//!
//! Generation 1 is always active. Generations 2-4 open with a status byte:
//! `0` revoked (followed by the former expiration), `1` active.

use super::{ensure_consumed, strip_discriminator, LayoutError};
use crate::layout::account_discriminator;
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

pub const SESSION_ACCOUNT: &str = "Session";

/// Generation written for every new session record
pub const CURRENT_SESSION_GENERATION: u8 = 4;

/// Application key/value pairs in the order the program wrote them
pub type ExtraEntries = Vec<(String, String)>;

const STATUS_REVOKED: u8 = 0;
const STATUS_ACTIVE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AuthorizedProgram {
    pub program_id: Pubkey,
    pub signer_pda: Pubkey,
}

/// Wire tags follow variant order: `0` Specific, `1` All
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AuthorizedPrograms {
    Specific(Vec<AuthorizedProgram>),
    All,
}

impl AuthorizedPrograms {
    pub fn allows(&self, program_id: &Pubkey) -> bool {
        match self {
            Self::All => true,
            Self::Specific(programs) => programs.iter().any(|p| &p.program_id == program_id),
        }
    }
}

/// Token scope of generations 1-3, which do not list mints
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AuthorizedTokens {
    Specific,
    All,
}

/// Token scope of generation 4
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AuthorizedTokensWithMints {
    Specific(Vec<Pubkey>),
    All,
}

impl From<AuthorizedTokens> for AuthorizedTokensWithMints {
    fn from(tokens: AuthorizedTokens) -> Self {
        match tokens {
            AuthorizedTokens::Specific => Self::Specific(Vec::new()),
            AuthorizedTokens::All => Self::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ActiveSessionInfoV1 {
    pub user: Pubkey,
    pub expiration: i64,
    pub authorized_programs: AuthorizedPrograms,
    pub authorized_tokens: AuthorizedTokens,
    pub extra: ExtraEntries,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ActiveSessionInfoV3 {
    pub domain_hash: [u8; 32],
    pub info: ActiveSessionInfoV1,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ActiveSessionInfoV4 {
    pub domain_hash: [u8; 32],
    pub user: Pubkey,
    pub expiration: i64,
    pub authorized_programs: AuthorizedPrograms,
    pub authorized_tokens: AuthorizedTokensWithMints,
    pub extra: ExtraEntries,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus<T> {
    Revoked { expiration: i64 },
    Active(T),
}

impl<T> RecordStatus<T> {
    fn active(&self) -> Option<&T> {
        match self {
            Self::Active(info) => Some(info),
            Self::Revoked { .. } => None,
        }
    }

    fn read(rest: &mut &[u8]) -> Result<Self, LayoutError>
    where
        T: BorshDeserialize,
    {
        match u8::deserialize(rest)? {
            STATUS_REVOKED => Ok(Self::Revoked {
                expiration: i64::deserialize(rest)?,
            }),
            STATUS_ACTIVE => Ok(Self::Active(T::deserialize(rest)?)),
            other => Err(LayoutError::UnknownStatus(other)),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), LayoutError>
    where
        T: BorshSerialize,
    {
        match self {
            Self::Revoked { expiration } => {
                out.push(STATUS_REVOKED);
                expiration.serialize(out)?;
            }
            Self::Active(info) => {
                out.push(STATUS_ACTIVE);
                info.serialize(out)?;
            }
        }
        Ok(())
    }
}

/// One of the historical record shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRecord {
    V1(ActiveSessionInfoV1),
    V2(RecordStatus<ActiveSessionInfoV1>),
    V3(RecordStatus<ActiveSessionInfoV3>),
    V4(RecordStatus<ActiveSessionInfoV4>),
}

impl SessionRecord {
    pub fn generation(&self) -> u8 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => 2,
            Self::V3(_) => 3,
            Self::V4(_) => 4,
        }
    }
}

/// Full decoded session account, including revoked records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAccountData {
    pub sponsor: Pubkey,
    pub major: u8,
    pub record: SessionRecord,
}

impl SessionAccountData {
    /// Canonical active record
    pub fn new_active(sponsor: Pubkey, major: u8, info: ActiveSessionInfoV4) -> Self {
        Self {
            sponsor,
            major,
            record: SessionRecord::V4(RecordStatus::Active(info)),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        let mut rest = strip_discriminator(data, SESSION_ACCOUNT)?;
        let sponsor = Pubkey::deserialize(&mut rest)?;
        let major = u8::deserialize(&mut rest)?;
        let record = match u8::deserialize(&mut rest)? {
            1 => SessionRecord::V1(ActiveSessionInfoV1::deserialize(&mut rest)?),
            2 => SessionRecord::V2(RecordStatus::read(&mut rest)?),
            3 => SessionRecord::V3(RecordStatus::read(&mut rest)?),
            4 => SessionRecord::V4(RecordStatus::read(&mut rest)?),
            other => return Err(LayoutError::UnknownGeneration(other)),
        };
        ensure_consumed(rest)?;

        Ok(Self {
            sponsor,
            major,
            record,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, LayoutError> {
        let mut out = account_discriminator(SESSION_ACCOUNT).to_vec();
        self.sponsor.serialize(&mut out)?;
        out.push(self.major);
        out.push(self.record.generation());
        match &self.record {
            SessionRecord::V1(info) => info.serialize(&mut out)?,
            SessionRecord::V2(status) => status.write(&mut out)?,
            SessionRecord::V3(status) => status.write(&mut out)?,
            SessionRecord::V4(status) => status.write(&mut out)?,
        }
        Ok(out)
    }

    /// Live projection, `None` for revoked records
    pub fn active(&self) -> Option<SessionAccount> {
        let minor = self.record.generation();
        let (user, expiration, domain_hash, authorized_programs, authorized_tokens, extra) =
            match &self.record {
                SessionRecord::V1(info) => v1_fields(info, None),
                SessionRecord::V2(status) => v1_fields(status.active()?, None),
                SessionRecord::V3(status) => {
                    let info = status.active()?;
                    v1_fields(&info.info, Some(info.domain_hash))
                }
                SessionRecord::V4(status) => {
                    let info = status.active()?;
                    (
                        info.user,
                        info.expiration,
                        Some(info.domain_hash),
                        info.authorized_programs.clone(),
                        info.authorized_tokens.clone(),
                        info.extra.clone(),
                    )
                }
            };

        Some(SessionAccount {
            sponsor: self.sponsor,
            major: self.major,
            minor,
            user,
            expiration,
            domain_hash,
            authorized_programs,
            authorized_tokens,
            extra,
        })
    }
}

type LiveFields = (
    Pubkey,
    i64,
    Option<[u8; 32]>,
    AuthorizedPrograms,
    AuthorizedTokensWithMints,
    ExtraEntries,
);

fn v1_fields(info: &ActiveSessionInfoV1, domain_hash: Option<[u8; 32]>) -> LiveFields {
    (
        info.user,
        info.expiration,
        domain_hash,
        info.authorized_programs.clone(),
        info.authorized_tokens.into(),
        info.extra.clone(),
    )
}

/// Active session record, normalized across generations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAccount {
    pub sponsor: Pubkey,
    pub major: u8,
    /// Record generation the account was written with
    pub minor: u8,
    pub user: Pubkey,
    pub expiration: i64,
    /// Absent before generation 3
    pub domain_hash: Option<[u8; 32]>,
    pub authorized_programs: AuthorizedPrograms,
    /// Generations before 4 report `Specific` with an empty mint list
    pub authorized_tokens: AuthorizedTokensWithMints,
    pub extra: ExtraEntries,
}

impl SessionAccount {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration < now
    }
}

/// Decode a session account, `None` when the record is revoked
pub fn decode_session(data: &[u8]) -> Result<Option<SessionAccount>, LayoutError> {
    Ok(SessionAccountData::decode(data)?.active())
}
