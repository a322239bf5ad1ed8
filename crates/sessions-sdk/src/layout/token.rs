//! SPL token accounts and mints, decoded with the token program's own layouts

use super::LayoutError;
use solana_account_decoder::parse_token::{UiAccountState, UiTokenAccount};
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::{program_option::COption, program_pack::Pack};
use std::str::FromStr;

pub use spl_token::state::{Account as TokenAccount, AccountState as TokenAccountState, Mint};

pub fn decode_token_account(data: &[u8]) -> Result<TokenAccount, LayoutError> {
    Ok(TokenAccount::unpack(data)?)
}

pub fn decode_mint(data: &[u8]) -> Result<Mint, LayoutError> {
    Ok(Mint::unpack(data)?)
}

/// Amount `delegate` may still move out of `account`
pub fn allowance_for(account: &TokenAccount, delegate: &Pubkey) -> u64 {
    match account.delegate {
        COption::Some(d) if &d == delegate => account.delegated_amount.min(account.amount),
        _ => 0,
    }
}

/// Token account from the RPC's `jsonParsed` rendering
pub fn from_parsed(info: &serde_json::Value) -> Result<TokenAccount, LayoutError> {
    let parsed: UiTokenAccount = serde_json::from_value(info.clone())
        .map_err(|e| LayoutError::ParsedTokenAccount(e.to_string()))?;

    let delegate = match &parsed.delegate {
        Some(delegate) => COption::Some(parse_pubkey(delegate)?),
        None => COption::None,
    };
    let delegated_amount = match &parsed.delegated_amount {
        Some(amount) => parse_amount(&amount.amount)?,
        None => 0,
    };
    let state = match parsed.state {
        UiAccountState::Uninitialized => TokenAccountState::Uninitialized,
        UiAccountState::Initialized => TokenAccountState::Initialized,
        UiAccountState::Frozen => TokenAccountState::Frozen,
    };

    Ok(TokenAccount {
        mint: parse_pubkey(&parsed.mint)?,
        owner: parse_pubkey(&parsed.owner)?,
        amount: parse_amount(&parsed.token_amount.amount)?,
        delegate,
        state,
        delegated_amount,
        ..TokenAccount::default()
    })
}

fn parse_pubkey(text: &str) -> Result<Pubkey, LayoutError> {
    Pubkey::from_str(text)
        .map_err(|e| LayoutError::ParsedTokenAccount(format!("bad address {text:?}: {e}")))
}

fn parse_amount(text: &str) -> Result<u64, LayoutError> {
    text.parse()
        .map_err(|e| LayoutError::ParsedTokenAccount(format!("bad amount {text:?}: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn token_account_bytes(
        mint: &Pubkey,
        owner: &Pubkey,
        amount: u64,
        delegate: Option<(&Pubkey, u64)>,
    ) -> Vec<u8> {
        let account = TokenAccount {
            mint: *mint,
            owner: *owner,
            amount,
            delegate: delegate.map_or(COption::None, |(d, _)| COption::Some(*d)),
            state: TokenAccountState::Initialized,
            delegated_amount: delegate.map_or(0, |(_, amount)| amount),
            ..TokenAccount::default()
        };
        let mut data = vec![0u8; TokenAccount::LEN];
        TokenAccount::pack(account, &mut data).unwrap();
        data
    }

    pub fn mint_bytes(decimals: u8) -> Vec<u8> {
        let mint = Mint {
            supply: 1_000,
            decimals,
            is_initialized: true,
            ..Mint::default()
        };
        let mut data = vec![0u8; Mint::LEN];
        Mint::pack(mint, &mut data).unwrap();
        data
    }
}
