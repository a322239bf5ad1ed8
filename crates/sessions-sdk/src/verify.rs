//! Signature verification over raw or prefixed off-chain messages
//!
//! Some wallets sign the intent bytes directly, others wrap them in the standard
//! off-chain message envelope first. The verifier accepts both and reports which
//! bytes were actually signed, since those are the bytes the ed25519 verification
//! instruction must carry.

use crate::{Result, SessionError};
use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use solana_sdk::{offchain_message::OffchainMessage, pubkey::Pubkey, signature::Signature};
use tracing::debug;

/// Envelope version wallets sign with
pub const OFFCHAIN_MESSAGE_VERSION: u8 = 0;

/// Wrap `message` in the prefixed off-chain envelope, `None` if it cannot be carried
pub fn prefixed_message(message: &[u8]) -> Option<Vec<u8>> {
    OffchainMessage::new(OFFCHAIN_MESSAGE_VERSION, message)
        .and_then(|envelope| envelope.serialize())
        .ok()
}

/// Which encoding of the message the signature covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedEncoding {
    Raw,
    Prefixed,
}

/// A signature together with the exact bytes it verifies over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    pub signer: Pubkey,
    pub signature: Signature,
    pub encoding: SignedEncoding,
    pub signed_bytes: Vec<u8>,
}

fn verifies(signer: &Pubkey, signature: &Signature, bytes: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&signer.to_bytes()) else {
        return false;
    };
    let Ok(raw) = <[u8; 64]>::try_from(signature.as_ref()) else {
        return false;
    };
    key.verify_strict(bytes, &DalekSignature::from_bytes(&raw))
        .is_ok()
}

/// Verify `signature` over `message`, falling back to the prefixed envelope.
pub fn verify_signature(
    signer: &Pubkey,
    signature: &Signature,
    message: &[u8],
) -> Result<VerifiedMessage> {
    if verifies(signer, signature, message) {
        debug!(%signer, "signature verified over raw message");
        return Ok(VerifiedMessage {
            signer: *signer,
            signature: *signature,
            encoding: SignedEncoding::Raw,
            signed_bytes: message.to_vec(),
        });
    }

    if let Some(prefixed) = prefixed_message(message) {
        if verifies(signer, signature, &prefixed) {
            debug!(%signer, "signature verified over prefixed message");
            return Ok(VerifiedMessage {
                signer: *signer,
                signature: *signature,
                encoding: SignedEncoding::Prefixed,
                signed_bytes: prefixed,
            });
        }
    }

    Err(SessionError::UnverifiableSignature { signer: *signer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::{Keypair, Signer};

    #[test]
    fn test_prefixed_layout() {
        let prefixed = prefixed_message(b"hello").unwrap();
        assert_eq!(&prefixed[..16], b"\xffsolana offchain");
        assert_eq!(prefixed[16], OFFCHAIN_MESSAGE_VERSION);
        // restricted ASCII
        assert_eq!(prefixed[17], 0);
        assert_eq!(&prefixed[18..20], &5u16.to_le_bytes());
        assert_eq!(&prefixed[20..], b"hello");
    }

    #[test]
    fn test_envelope_limits() {
        assert_eq!(prefixed_message(b"line\nbreak").unwrap()[17], 1);
        assert!(prefixed_message(&[0xff, 0xfe]).is_none());
        assert!(prefixed_message(&vec![b'a'; 70_000]).is_none());
    }

    #[test]
    fn test_raw_signature() {
        let keypair = Keypair::new();
        let message = b"Sessions:\nversion: 0.4";
        let signature = keypair.sign_message(message);

        let verified = verify_signature(&keypair.pubkey(), &signature, message).unwrap();
        assert_eq!(verified.encoding, SignedEncoding::Raw);
        assert_eq!(verified.signed_bytes, message.to_vec());
    }

    #[test]
    fn test_prefixed_only_signature() {
        let keypair = Keypair::new();
        let message = b"Sessions:\nversion: 0.4";
        let prefixed = prefixed_message(message).unwrap();
        let signature = keypair.sign_message(&prefixed);

        let verified = verify_signature(&keypair.pubkey(), &signature, message).unwrap();
        assert_eq!(verified.encoding, SignedEncoding::Prefixed);
        assert_eq!(verified.signed_bytes, prefixed);
    }

    #[test]
    fn test_unverifiable_signature() {
        let keypair = Keypair::new();
        let other = Keypair::new();
        let message = b"Sessions:\nversion: 0.4";
        let signature = other.sign_message(message);

        let err = verify_signature(&keypair.pubkey(), &signature, message).unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnverifiableSignature { signer } if signer == keypair.pubkey()
        ));
    }
}
