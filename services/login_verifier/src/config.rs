//! Service configuration

use anyhow::{Context, Result};
use sessions_sdk::SESSION_MANAGER_PROGRAM_ID;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Solana RPC URL
    pub rpc_url: String,

    /// API server port
    pub api_port: u16,

    /// Only accept sessions recorded for this domain
    pub domain: Option<String>,

    /// Maximum token age in seconds
    pub token_max_age: Option<i64>,

    /// Program that must own every session record
    pub session_manager_program: Pubkey,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8899".to_string()),

            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            domain: std::env::var("LOGIN_DOMAIN").ok(),

            token_max_age: std::env::var("LOGIN_TOKEN_MAX_AGE")
                .ok()
                .map(|value| value.parse())
                .transpose()
                .context("Invalid LOGIN_TOKEN_MAX_AGE")?,

            session_manager_program: std::env::var("SESSION_MANAGER_PROGRAM")
                .ok()
                .map(|value| Pubkey::from_str(&value))
                .transpose()
                .context("Invalid SESSION_MANAGER_PROGRAM")?
                .unwrap_or(SESSION_MANAGER_PROGRAM_ID),
        })
    }
}
