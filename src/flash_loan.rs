//! Client for the on-chain flash-loan program.
//!
//! Builds raw Anchor instructions (discriminator + borsh-encoded args)
//! without an Anchor dependency, and decodes the lending-pool account at
//! fixed offsets.

use sha2::{Digest, Sha256};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{BotError, Result};

pub const DEFAULT_PROGRAM_ID: &str = "2chVPk6DV21qWuyUA2eHAzATdFSHM7ykv1fVX7Gv6nor";

// Anchor instruction discriminators, from the program IDL.
const BORROW_DISCRIMINATOR: [u8; 8] = [64, 203, 133, 3, 2, 181, 8, 180];
const REPAY_DISCRIMINATOR: [u8; 8] = [119, 239, 18, 45, 194, 107, 31, 238];

const LENDING_POOL_SEED: &[u8] = b"lending_pool";
const POOL_VAULT_SEED: &[u8] = b"pool_vault";
const FLASH_LOAN_RECEIPT_SEED: &[u8] = b"flash_loan_receipt";

/// `sha256("global:<name>")[..8]`, the Anchor method discriminator.
fn anchor_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[derive(Debug, Clone)]
pub struct PoolState {
    pub admin: Pubkey,
    pub token_mint: Pubkey,
    pub vault: Pubkey,
    pub total_deposits: u64,
    pub total_shares: u64,
    pub total_fees_earned: u64,
    pub fee_basis_points: u16,
    pub is_active: bool,
}

impl PoolState {
    /// Layout: 8-byte discriminator, then admin, token_mint, vault,
    /// total_deposits, total_shares, total_fees_earned, fee_basis_points,
    /// bump, vault_bump, is_active.
    pub fn decode(data: &[u8]) -> Result<Self> {
        const MIN_LEN: usize = 8 + 32 * 3 + 8 * 3 + 2 + 1 + 1 + 1;
        if data.len() < MIN_LEN {
            return Err(BotError::ChainError {
                err: format!("pool account too short: {} bytes", data.len()),
            });
        }
        let mut off = 8;
        let read_pubkey = |off: &mut usize| {
            let pk = Pubkey::try_from(&data[*off..*off + 32]).expect("32 bytes");
            *off += 32;
            pk
        };
        let read_u64 = |off: &mut usize| {
            let v = u64::from_le_bytes(data[*off..*off + 8].try_into().expect("8 bytes"));
            *off += 8;
            v
        };
        let admin = read_pubkey(&mut off);
        let token_mint = read_pubkey(&mut off);
        let vault = read_pubkey(&mut off);
        let total_deposits = read_u64(&mut off);
        let total_shares = read_u64(&mut off);
        let total_fees_earned = read_u64(&mut off);
        let fee_basis_points = u16::from_le_bytes(data[off..off + 2].try_into().expect("2 bytes"));
        off += 2;
        off += 2; // bump, vault_bump
        let is_active = data[off] != 0;
        Ok(Self {
            admin,
            token_mint,
            vault,
            total_deposits,
            total_shares,
            total_fees_earned,
            fee_basis_points,
            is_active,
        })
    }
}

pub struct FlashLoanClient {
    rpc: Arc<RpcClient>,
    pub program_id: Pubkey,
    pub token_mint: Pubkey,
    pub pool_pda: Pubkey,
    pub vault_pda: Pubkey,
}

impl FlashLoanClient {
    pub fn new(rpc: Arc<RpcClient>, program_id: &str, token_mint: &str) -> Result<Self> {
        let program_id = Pubkey::from_str(program_id)
            .map_err(|_| BotError::config(format!("invalid flash loan program id: {program_id}")))?;
        let token_mint = Pubkey::from_str(token_mint)
            .map_err(|_| BotError::config(format!("invalid flash loan token mint: {token_mint}")))?;

        let (pool_pda, _) = Pubkey::find_program_address(
            &[LENDING_POOL_SEED, token_mint.as_ref()],
            &program_id,
        );
        let (vault_pda, _) =
            Pubkey::find_program_address(&[POOL_VAULT_SEED, pool_pda.as_ref()], &program_id);

        info!("Flash loan pool PDA: {pool_pda}");
        info!("Flash loan vault PDA: {vault_pda}");

        Ok(Self {
            rpc,
            program_id,
            token_mint,
            pool_pda,
            vault_pda,
        })
    }

    pub fn derive_receipt_pda(&self, borrower: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[
                FLASH_LOAN_RECEIPT_SEED,
                self.pool_pda.as_ref(),
                borrower.as_ref(),
            ],
            &self.program_id,
        )
        .0
    }

    pub async fn get_pool_state(&self) -> Result<PoolState> {
        let account = self.rpc.get_account(&self.pool_pda).await?;
        PoolState::decode(&account.data)
    }

    pub fn build_borrow_ix(
        &self,
        borrower: &Pubkey,
        borrower_token_account: &Pubkey,
        amount: u64,
    ) -> Instruction {
        let receipt = self.derive_receipt_pda(borrower);
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&BORROW_DISCRIMINATOR);
        data.extend_from_slice(&amount.to_le_bytes());

        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.pool_pda, false),
                AccountMeta::new(receipt, false),
                AccountMeta::new(self.vault_pda, false),
                AccountMeta::new(*borrower_token_account, false),
                AccountMeta::new(*borrower, true),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            data,
        }
    }

    pub fn build_repay_ix(
        &self,
        borrower: &Pubkey,
        borrower_token_account: &Pubkey,
    ) -> Instruction {
        let receipt = self.derive_receipt_pda(borrower);
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.pool_pda, false),
                AccountMeta::new(receipt, false),
                AccountMeta::new(self.vault_pda, false),
                AccountMeta::new(*borrower_token_account, false),
                AccountMeta::new(*borrower, true),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            data: REPAY_DISCRIMINATOR.to_vec(),
        }
    }

    /// Admin-only `update_pool_config(new_fee_basis_points, is_active)`.
    /// Both args are borsh `Option`s: a one-byte tag, then the value.
    pub fn build_update_pool_ix(
        &self,
        admin: &Pubkey,
        new_fee_bps: Option<u16>,
        is_active: Option<bool>,
    ) -> Instruction {
        let mut data = anchor_discriminator("update_pool_config").to_vec();
        match new_fee_bps {
            Some(fee) => {
                data.push(1);
                data.extend_from_slice(&fee.to_le_bytes());
            }
            None => data.push(0),
        }
        match is_active {
            Some(active) => {
                data.push(1);
                data.push(active as u8);
            }
            None => data.push(0),
        }

        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.pool_pda, false),
                AccountMeta::new_readonly(*admin, true),
            ],
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_pool(fee_bps: u16, active: bool) -> (Vec<u8>, Pubkey, Pubkey, Pubkey) {
        let admin = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        let mut data = vec![0u8; 8];
        data.extend_from_slice(admin.as_ref());
        data.extend_from_slice(mint.as_ref());
        data.extend_from_slice(vault.as_ref());
        data.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        data.extend_from_slice(&5_000_000u64.to_le_bytes());
        data.extend_from_slice(&123_456u64.to_le_bytes());
        data.extend_from_slice(&fee_bps.to_le_bytes());
        data.push(254);
        data.push(253);
        data.push(active as u8);
        data.extend_from_slice(&[0u8; 64]);
        (data, admin, mint, vault)
    }

    #[test]
    fn pool_state_decodes_fixed_offsets() {
        let (data, admin, mint, vault) = synthetic_pool(9, true);
        let state = PoolState::decode(&data).unwrap();
        assert_eq!(state.admin, admin);
        assert_eq!(state.token_mint, mint);
        assert_eq!(state.vault, vault);
        assert_eq!(state.total_deposits, 5_000_000_000);
        assert_eq!(state.total_shares, 5_000_000);
        assert_eq!(state.total_fees_earned, 123_456);
        assert_eq!(state.fee_basis_points, 9);
        assert!(state.is_active);
    }

    #[test]
    fn pool_state_rejects_short_account() {
        assert!(PoolState::decode(&[0u8; 40]).is_err());
    }

    fn client() -> FlashLoanClient {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        FlashLoanClient::new(
            rpc,
            DEFAULT_PROGRAM_ID,
            crate::tokens::USDC_MINT,
        )
        .unwrap()
    }

    #[test]
    fn borrow_ix_layout() {
        let c = client();
        let borrower = Pubkey::new_unique();
        let ata = Pubkey::new_unique();
        let ix = c.build_borrow_ix(&borrower, &ata, 200_000_000);

        assert_eq!(ix.program_id, c.program_id);
        assert_eq!(&ix.data[..8], &BORROW_DISCRIMINATOR);
        assert_eq!(&ix.data[8..], &200_000_000u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[0].pubkey, c.pool_pda);
        assert_eq!(ix.accounts[1].pubkey, c.derive_receipt_pda(&borrower));
        assert_eq!(ix.accounts[2].pubkey, c.vault_pda);
        assert_eq!(ix.accounts[3].pubkey, ata);
        assert!(ix.accounts[4].is_signer);
        assert_eq!(ix.accounts[5].pubkey, system_program::id());
        assert_eq!(ix.accounts[6].pubkey, spl_token::id());
    }

    #[test]
    fn repay_ix_shares_receipt_with_borrow() {
        let c = client();
        let borrower = Pubkey::new_unique();
        let ata = Pubkey::new_unique();
        let borrow = c.build_borrow_ix(&borrower, &ata, 1);
        let repay = c.build_repay_ix(&borrower, &ata);
        assert_eq!(repay.data, REPAY_DISCRIMINATOR.to_vec());
        assert_eq!(repay.accounts.len(), 6);
        // same receipt PDA on both sides of the loan
        assert_eq!(borrow.accounts[1].pubkey, repay.accounts[1].pubkey);
    }

    #[test]
    fn update_pool_ix_encodes_options() {
        let c = client();
        let admin = Pubkey::new_unique();
        let ix = c.build_update_pool_ix(&admin, Some(12), None);
        assert_eq!(ix.data.len(), 8 + 1 + 2 + 1);
        assert_eq!(ix.data[8], 1);
        assert_eq!(&ix.data[9..11], &12u16.to_le_bytes());
        assert_eq!(ix.data[11], 0);
        assert!(ix.accounts[1].is_signer);
    }
}
