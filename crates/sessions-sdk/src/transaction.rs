//! Instruction and transaction assembly
//!
//! Transactions leave the client partially signed: the session key (and any other
//! client-held signer) signs, the sponsor signature is added by the relay.

use crate::address;
use crate::core::SessionConfig;
use crate::layout::instruction_discriminator;
use crate::verify::VerifiedMessage;
use crate::{Result, SessionError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    ed25519_program,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::Keypair,
    system_program, sysvar,
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use tracing::debug;

// ================================
// Signature Verification Instruction
// ================================

const ED25519_HEADER_LEN: usize = 2;
const ED25519_OFFSETS_LEN: usize = 14;
const PUBKEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

/// Ed25519 precompile instruction checking `verified` over its exact signed bytes.
///
/// Data layout: `[count, padding]`, seven `u16` offsets, then public key, signature
/// and message. Instruction indices of `u16::MAX` point at this instruction's own data.
pub fn ed25519_verify_instruction(verified: &VerifiedMessage) -> Result<Instruction> {
    let public_key_offset = ED25519_HEADER_LEN + ED25519_OFFSETS_LEN;
    let signature_offset = public_key_offset + PUBKEY_LEN;
    let message_offset = signature_offset + SIGNATURE_LEN;

    let message_size = u16::try_from(verified.signed_bytes.len()).map_err(|_| {
        SessionError::TransactionBuild(format!(
            "signed message of {} bytes does not fit a verification instruction",
            verified.signed_bytes.len()
        ))
    })?;

    let mut data = Vec::with_capacity(message_offset + verified.signed_bytes.len());
    data.push(1);
    data.push(0);
    for value in [
        signature_offset as u16,
        u16::MAX,
        public_key_offset as u16,
        u16::MAX,
        message_offset as u16,
        message_size,
        u16::MAX,
    ] {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data.extend_from_slice(verified.signer.as_ref());
    data.extend_from_slice(verified.signature.as_ref());
    data.extend_from_slice(&verified.signed_bytes);

    Ok(Instruction {
        program_id: ed25519_program::id(),
        accounts: vec![],
        data,
    })
}

// ================================
// Session Manager Instructions
// ================================

/// Start (or replace) a session; the program reads the signed intent from the
/// instructions sysvar
pub fn start_session_instruction(
    config: &SessionConfig,
    sponsor: &Pubkey,
    session_key: &Pubkey,
    wallet: &Pubkey,
    token_mints: &[Pubkey],
) -> Instruction {
    let (domain_record, _) =
        address::domain_record_address(&config.domain, &config.domain_registry_program);
    let (program_signer, _) = address::program_signer_address(&config.session_manager_program);

    let mut accounts = vec![
        AccountMeta::new(*sponsor, true),
        AccountMeta::new(*session_key, true),
        AccountMeta::new_readonly(sysvar::instructions::id(), false),
        AccountMeta::new_readonly(domain_record, false),
        AccountMeta::new_readonly(program_signer, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
    ];

    // Per-mint pairs: the user's token account receives the delegation
    for mint in token_mints {
        accounts.push(AccountMeta::new(
            get_associated_token_address(wallet, mint),
            false,
        ));
        accounts.push(AccountMeta::new_readonly(*mint, false));
    }

    Instruction {
        program_id: config.session_manager_program,
        accounts,
        data: instruction_discriminator("start_session").to_vec(),
    }
}

/// Revoke a session, returning its rent to the sponsor
pub fn revoke_session_instruction(
    config: &SessionConfig,
    session_key: &Pubkey,
    sponsor: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: config.session_manager_program,
        accounts: vec![
            AccountMeta::new(*session_key, true),
            AccountMeta::new(*sponsor, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: instruction_discriminator("revoke_session").to_vec(),
    }
}

// ================================
// Intent Transfer Instruction
// ================================

/// Move tokens on a wallet-signed transfer intent
pub fn send_tokens_instruction(
    config: &SessionConfig,
    sponsor: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
    recipient: &Pubkey,
) -> Instruction {
    let program = config.intent_transfer_program;
    let (nonce, _) = address::nonce_address(owner, &program);
    let (authority, _) = address::intent_transfer_authority(&program);

    Instruction {
        program_id: program,
        accounts: vec![
            AccountMeta::new_readonly(sysvar::instructions::id(), false),
            AccountMeta::new(get_associated_token_address(owner, mint), false),
            AccountMeta::new(get_associated_token_address(recipient, mint), false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(nonce, false),
            AccountMeta::new_readonly(authority, false),
            AccountMeta::new(*sponsor, true),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: instruction_discriminator("send_tokens").to_vec(),
    }
}

// ================================
// Transaction Builder
// ================================

/// Builder for sponsor-paid transactions
pub struct TransactionBuilder {
    fee_payer: Pubkey,
    instructions: Vec<Instruction>,
    compute_units: Option<u32>,
    priority_fee: Option<u64>,
}

impl TransactionBuilder {
    /// `fee_payer` is the sponsor; its signature is left for the relay
    pub fn new(fee_payer: Pubkey) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
            compute_units: None,
            priority_fee: None,
        }
    }

    pub fn add_instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn add_instructions(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.instructions.extend(instructions);
        self
    }

    /// Set compute unit limit
    pub fn with_compute_units(mut self, units: u32) -> Self {
        self.compute_units = Some(units);
        self
    }

    /// Set priority fee (micro-lamports per compute unit)
    pub fn with_priority_fee(mut self, fee: u64) -> Self {
        self.priority_fee = Some(fee);
        self
    }

    /// Assemble and sign with every client-held signer
    pub fn build(mut self, recent_blockhash: Hash, signers: &[&Keypair]) -> Result<Transaction> {
        if let Some(units) = self.compute_units {
            self.instructions
                .insert(0, ComputeBudgetInstruction::set_compute_unit_limit(units));
        }
        if let Some(fee) = self.priority_fee {
            self.instructions
                .insert(0, ComputeBudgetInstruction::set_compute_unit_price(fee));
        }

        let message =
            Message::new_with_blockhash(&self.instructions, Some(&self.fee_payer), &recent_blockhash);
        let mut transaction = Transaction::new_unsigned(message);
        transaction
            .try_partial_sign(signers, recent_blockhash)
            .map_err(|e| SessionError::TransactionBuild(e.to_string()))?;

        debug!(
            fee_payer = %self.fee_payer,
            instructions = self.instructions.len(),
            "built partially signed transaction"
        );
        Ok(transaction)
    }
}

/// Wire form sent to the relay: base64 of the bincode-serialized transaction
pub fn encode_transaction(transaction: &Transaction) -> Result<String> {
    Ok(STANDARD.encode(bincode::serialize(transaction)?))
}

pub fn decode_transaction(encoded: &str) -> Result<Transaction> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SessionError::TransactionBuild(e.to_string()))?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_signature;
    use solana_sdk::signature::{Signature, Signer};

    #[test]
    fn test_ed25519_instruction_layout() {
        let keypair = Keypair::new();
        let message = b"Sessions intent";
        let signature = keypair.sign_message(message);
        let verified = verify_signature(&keypair.pubkey(), &signature, message).unwrap();

        let ix = ed25519_verify_instruction(&verified).unwrap();
        assert_eq!(ix.program_id, ed25519_program::id());
        assert!(ix.accounts.is_empty());
        assert_eq!(ix.data[0], 1);
        assert_eq!(&ix.data[2..4], &48u16.to_le_bytes());
        assert_eq!(&ix.data[4..6], &u16::MAX.to_le_bytes());
        assert_eq!(&ix.data[6..8], &16u16.to_le_bytes());
        assert_eq!(&ix.data[10..12], &112u16.to_le_bytes());
        assert_eq!(&ix.data[12..14], &(message.len() as u16).to_le_bytes());
        assert_eq!(&ix.data[16..48], keypair.pubkey().as_ref());
        assert_eq!(&ix.data[48..112], signature.as_ref());
        assert_eq!(&ix.data[112..], message);
    }

    #[test]
    fn test_start_session_accounts() {
        let config = SessionConfig::default();
        let (sponsor, session, wallet) =
            (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let mints = [Pubkey::new_unique(), Pubkey::new_unique()];

        let ix = start_session_instruction(&config, &sponsor, &session, &wallet, &mints);
        assert_eq!(ix.program_id, config.session_manager_program);
        assert_eq!(ix.data, instruction_discriminator("start_session"));
        assert_eq!(ix.accounts.len(), 7 + 2 * mints.len());
        assert!(ix.accounts[0].is_signer && ix.accounts[0].pubkey == sponsor);
        assert!(ix.accounts[1].is_signer && ix.accounts[1].pubkey == session);
        assert_eq!(
            ix.accounts[7].pubkey,
            get_associated_token_address(&wallet, &mints[0])
        );
        assert!(ix.accounts[7].is_writable);
        assert_eq!(ix.accounts[8].pubkey, mints[0]);
    }

    #[test]
    fn test_partial_sign_leaves_sponsor_slot_empty() {
        let config = SessionConfig::default();
        let sponsor = Pubkey::new_unique();
        let session = Keypair::new();

        let tx = TransactionBuilder::new(sponsor)
            .add_instruction(revoke_session_instruction(&config, &session.pubkey(), &sponsor))
            .build(Hash::new_unique(), &[&session])
            .unwrap();

        assert_eq!(tx.message.account_keys[0], sponsor);
        assert_eq!(tx.signatures[0], Signature::default());
        assert_ne!(tx.signatures[1], Signature::default());
    }

    #[test]
    fn test_compute_budget_instructions_come_first() {
        let session = Keypair::new();
        let sponsor = Pubkey::new_unique();
        let tx = TransactionBuilder::new(sponsor)
            .add_instruction(revoke_session_instruction(
                &SessionConfig::default(),
                &session.pubkey(),
                &sponsor,
            ))
            .with_compute_units(200_000)
            .with_priority_fee(10)
            .build(Hash::new_unique(), &[&session])
            .unwrap();
        assert_eq!(tx.message.instructions.len(), 3);
    }

    #[test]
    fn test_wire_encoding() {
        let session = Keypair::new();
        let sponsor = Pubkey::new_unique();
        let tx = TransactionBuilder::new(sponsor)
            .add_instruction(revoke_session_instruction(
                &SessionConfig::default(),
                &session.pubkey(),
                &sponsor,
            ))
            .build(Hash::new_unique(), &[&session])
            .unwrap();

        let encoded = encode_transaction(&tx).unwrap();
        assert_eq!(decode_transaction(&encoded).unwrap(), tx);
        assert!(decode_transaction("not base64!").is_err());
    }
}
