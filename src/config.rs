//! Runtime configuration. Values are populated from CLI flags, each of
//! which has an environment counterpart (CLI wins); see the `Cli` struct in
//! `main.rs`.

use solana_sdk::signature::{read_keypair_file, Keypair};
use tracing::warn;

use crate::error::{BotError, Result};
use crate::tokens;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub wallet_path: String,
    pub pairs: Vec<String>,
    pub borrow_amount: u64,
    pub min_profit_bps: i32,
    pub max_slippage_bps: u16,
    pub poll_interval_ms: u64,
    pub priority_fee_micro_lamports: u64,
    pub compute_unit_limit: u32,
    pub flash_loan_program_id: String,
    pub flash_loan_token_mint: String,
    pub dry_run: bool,
    pub use_jito: bool,
    pub jito_region: String,
    pub jito_tip_lamports: u64,
    pub jupiter_api_key: Option<String>,
    pub max_consecutive_failures: u32,
}

impl Config {
    /// Drop pairs that do not parse, keeping the rest. An empty result is a
    /// configuration error.
    pub fn validate(&mut self) -> Result<()> {
        self.pairs.retain(|pair| match tokens::parse_pair(pair) {
            Ok(_) => true,
            Err(e) => {
                warn!("dropping unparseable pair {pair}: {e}");
                false
            }
        });
        if self.pairs.is_empty() {
            return Err(BotError::config("no valid pairs configured"));
        }
        if self.borrow_amount == 0 {
            return Err(BotError::config("borrow amount must be positive"));
        }
        Ok(())
    }

    pub fn load_keypair(&self) -> Result<Keypair> {
        let expanded = shellexpand::tilde(&self.wallet_path).to_string();
        read_keypair_file(&expanded)
            .map_err(|e| BotError::wallet(format!("failed to read keypair from {expanded}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            rpc_url: "http://localhost:8899".to_string(),
            ws_url: None,
            wallet_path: "~/.config/solana/id.json".to_string(),
            pairs: vec!["SOL/USDC".to_string()],
            borrow_amount: 200_000_000,
            min_profit_bps: 5,
            max_slippage_bps: 50,
            poll_interval_ms: 2_000,
            priority_fee_micro_lamports: 25_000,
            compute_unit_limit: 400_000,
            flash_loan_program_id: crate::flash_loan::DEFAULT_PROGRAM_ID.to_string(),
            flash_loan_token_mint: tokens::USDC_MINT.to_string(),
            dry_run: true,
            use_jito: false,
            jito_region: "default".to_string(),
            jito_tip_lamports: 10_000,
            jupiter_api_key: None,
            max_consecutive_failures: 10,
        }
    }

    #[test]
    fn validate_drops_bad_pairs_but_keeps_good() {
        let mut cfg = base_config();
        cfg.pairs = vec!["SOL/USDC".to_string(), "garbage".to_string()];
        cfg.validate().unwrap();
        assert_eq!(cfg.pairs, vec!["SOL/USDC".to_string()]);
    }

    #[test]
    fn validate_rejects_empty_pair_set() {
        let mut cfg = base_config();
        cfg.pairs = vec!["not-a-pair".to_string()];
        assert!(cfg.validate().is_err());
    }
}
