//! Intent-transfer nonce account layout

use super::{account_discriminator, ensure_consumed, strip_discriminator, LayoutError};
use borsh::{BorshDeserialize, BorshSerialize};

pub const NONCE_ACCOUNT: &str = "Nonce";

/// Last nonce consumed by an owner's transfer intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct NonceAccount {
    pub nonce: u64,
}

impl NonceAccount {
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        let mut rest = strip_discriminator(data, NONCE_ACCOUNT)?;
        let account = Self::deserialize(&mut rest)?;
        ensure_consumed(rest)?;
        Ok(account)
    }

    pub fn encode(&self) -> Result<Vec<u8>, LayoutError> {
        let mut out = account_discriminator(NONCE_ACCOUNT).to_vec();
        self.serialize(&mut out)?;
        Ok(out)
    }

    /// Nonce the next intent must carry
    pub fn next(&self) -> u64 {
        self.nonce.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_layout() {
        let bytes = NonceAccount { nonce: 41 }.encode().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..], &41u64.to_le_bytes());

        let account = NonceAccount::decode(&bytes).unwrap();
        assert_eq!(account.next(), 42);
    }

    #[test]
    fn test_foreign_account_rejected() {
        let mut bytes = NonceAccount { nonce: 1 }.encode().unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            NonceAccount::decode(&bytes),
            Err(LayoutError::Discriminator { .. })
        ));
    }
}
