//! Domain record layout: a flat array of `(program_id, signer_pda)` entries

use super::{AuthorizedProgram, AuthorizedPrograms, LayoutError};
use solana_sdk::pubkey::Pubkey;

const ENTRY_LEN: usize = 64;

/// Programs registered for one application domain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainRecord {
    pub programs: Vec<AuthorizedProgram>,
}

impl DomainRecord {
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        if data.len() % ENTRY_LEN != 0 {
            return Err(LayoutError::DomainRecordLength(data.len()));
        }

        let programs = data
            .chunks_exact(ENTRY_LEN)
            .map(|entry| {
                let (program_id, signer_pda) = entry.split_at(32);
                AuthorizedProgram {
                    program_id: Pubkey::new_from_array(to_array(program_id)),
                    signer_pda: Pubkey::new_from_array(to_array(signer_pda)),
                }
            })
            .collect();

        Ok(Self { programs })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.programs
            .iter()
            .flat_map(|p| p.program_id.to_bytes().into_iter().chain(p.signer_pda.to_bytes()))
            .collect()
    }

    /// Program scope granted to sessions of this domain
    pub fn authorized_programs(&self) -> AuthorizedPrograms {
        AuthorizedPrograms::Specific(self.programs.clone())
    }
}

fn to_array(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entries() {
        let record = DomainRecord {
            programs: vec![
                AuthorizedProgram {
                    program_id: Pubkey::new_unique(),
                    signer_pda: Pubkey::new_unique(),
                },
                AuthorizedProgram {
                    program_id: Pubkey::new_unique(),
                    signer_pda: Pubkey::new_unique(),
                },
            ],
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), 128);
        assert_eq!(&bytes[64..96], record.programs[1].program_id.as_ref());
        assert_eq!(DomainRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_empty_record() {
        assert!(DomainRecord::decode(&[]).unwrap().programs.is_empty());
    }

    #[test]
    fn test_partial_entry_rejected() {
        assert!(matches!(
            DomainRecord::decode(&[0u8; 65]),
            Err(LayoutError::DomainRecordLength(65))
        ));
    }
}
