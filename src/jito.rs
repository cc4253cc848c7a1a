//! Jito block-engine client: tip instruction, transaction and bundle
//! submission over the priority-auction endpoint.

use rand::seq::SliceRandom;
use serde_json::{json, Value};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{BotError, Result};

pub const TIP_ACCOUNTS: &[&str] = &[
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Invalid,
    Pending,
    Failed,
    Landed,
}

pub struct JitoClient {
    endpoint: String,
    http: reqwest::Client,
}

impl JitoClient {
    pub fn new(region: &str) -> Result<Self> {
        let endpoint = match region {
            "ny" => "https://ny.mainnet.block-engine.jito.wtf",
            "amsterdam" => "https://amsterdam.mainnet.block-engine.jito.wtf",
            "frankfurt" => "https://frankfurt.mainnet.block-engine.jito.wtf",
            "tokyo" => "https://tokyo.mainnet.block-engine.jito.wtf",
            "slc" => "https://slc.mainnet.block-engine.jito.wtf",
            _ => "https://mainnet.block-engine.jito.wtf",
        }
        .to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        info!("Jito client initialized: {endpoint}");
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Transfer to a tip account chosen uniformly at random. Placed last in
    /// the transaction so the tip is only paid on success.
    pub fn build_tip_instruction(&self, payer: &Pubkey, tip_lamports: u64) -> Instruction {
        let account = TIP_ACCOUNTS
            .choose(&mut rand::thread_rng())
            .expect("non-empty tip list");
        let tip_account = Pubkey::from_str(account).expect("static tip account");
        system_instruction::transfer(payer, &tip_account, tip_lamports)
    }

    pub async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<String> {
        let wire = bincode::serialize(tx).map_err(|e| BotError::ChainError {
            err: format!("serialize: {e}"),
        })?;
        let serialized = bs58::encode(wire).into_string();
        let result = self
            .rpc_call(
                "/api/v1/transactions",
                "sendTransaction",
                json!([serialized, {"encoding": "base58"}]),
            )
            .await?;
        let sig = result.as_str().unwrap_or_default().to_string();
        info!("Tx sent via Jito: {sig}");
        Ok(sig)
    }

    /// Submit 1-5 ordered transactions as a bundle; the last one must carry
    /// the tip transfer.
    pub async fn send_bundle(&self, txs: &[VersionedTransaction]) -> Result<String> {
        if txs.is_empty() || txs.len() > 5 {
            return Err(BotError::config(format!(
                "bundle must contain 1-5 transactions, got {}",
                txs.len()
            )));
        }
        let serialized = txs
            .iter()
            .map(|tx| {
                bincode::serialize(tx)
                    .map(|wire| bs58::encode(wire).into_string())
                    .map_err(|e| BotError::ChainError {
                        err: format!("serialize: {e}"),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let result = self
            .rpc_call("/api/v1/bundles", "sendBundle", json!([serialized]))
            .await?;
        let bundle_id = result.as_str().unwrap_or_default().to_string();
        info!("Bundle sent via Jito: {bundle_id} ({} txs)", txs.len());
        Ok(bundle_id)
    }

    pub async fn get_bundle_statuses(&self, bundle_ids: &[String]) -> Result<Vec<BundleStatus>> {
        let result = self
            .rpc_call("/api/v1/bundles", "getBundleStatuses", json!([bundle_ids]))
            .await?;
        let statuses = result
            .pointer("/value")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| {
                        match e.get("confirmation_status").and_then(Value::as_str) {
                            Some("confirmed") | Some("finalized") => BundleStatus::Landed,
                            Some("processed") => BundleStatus::Pending,
                            _ if e.get("err").map(|v| !v.is_null()).unwrap_or(false) => {
                                BundleStatus::Failed
                            }
                            _ => BundleStatus::Invalid,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(statuses)
    }

    async fn rpc_call(&self, path: &str, method: &str, params: Value) -> Result<Value> {
        let url = format!("{}{path}", self.endpoint);
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BotError::Timeout { ms: 10_000 }
                } else {
                    BotError::Http(e)
                }
            })?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(BotError::ProviderRateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::ProviderRequest {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = resp.json().await?;
        if let Some(err) = body.get("error").filter(|v| !v.is_null()) {
            return Err(BotError::ProviderRequest {
                status: status.as_u16(),
                body: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("block engine error")
                    .to_string(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_instruction_targets_known_account() {
        let client = JitoClient::new("frankfurt").unwrap();
        let payer = Pubkey::new_unique();
        let ix = client.build_tip_instruction(&payer, 10_000);
        assert_eq!(ix.program_id, solana_sdk::system_program::id());
        let dest = ix.accounts[1].pubkey.to_string();
        assert!(TIP_ACCOUNTS.contains(&dest.as_str()));
    }

    #[test]
    fn unknown_region_falls_back_to_default() {
        let client = JitoClient::new("mars").unwrap();
        assert_eq!(client.endpoint(), "https://mainnet.block-engine.jito.wtf");
    }
}
