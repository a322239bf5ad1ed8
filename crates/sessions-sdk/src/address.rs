//! Program-derived address helpers
//!
//! Seeds here must stay byte-identical to the ones the on-chain programs use. A drift
//! makes the relay reference accounts the program does not recognize.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

pub const DOMAIN_RECORD_SEED: &[u8] = b"domain-record";
pub const PROGRAM_SIGNER_SEED: &[u8] = b"fogo_session_program_signer";
pub const NONCE_SEED: &[u8] = b"nonce";
pub const INTENT_TRANSFER_SEED: &[u8] = b"intent_transfer";

/// Derive an address and bump from `seeds` under `program_id`
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(seeds, program_id)
}

/// SHA-256 of the domain string, as stored in session records
pub fn domain_hash(domain: &str) -> [u8; 32] {
    Sha256::digest(domain.as_bytes()).into()
}

/// Domain record listing the programs a domain's sessions may call
pub fn domain_record_address(domain: &str, registry_program: &Pubkey) -> (Pubkey, u8) {
    derive(&[DOMAIN_RECORD_SEED, &domain_hash(domain)], registry_program)
}

/// Signer PDA a program uses when acting on behalf of a session
pub fn program_signer_address(program_id: &Pubkey) -> (Pubkey, u8) {
    derive(&[PROGRAM_SIGNER_SEED], program_id)
}

/// Per-owner intent-transfer nonce account
pub fn nonce_address(owner: &Pubkey, intent_transfer_program: &Pubkey) -> (Pubkey, u8) {
    derive(&[NONCE_SEED, owner.as_ref()], intent_transfer_program)
}

/// Authority the intent-transfer program signs token moves with
pub fn intent_transfer_authority(intent_transfer_program: &Pubkey) -> (Pubkey, u8) {
    derive(&[INTENT_TRANSFER_SEED], intent_transfer_program)
}
