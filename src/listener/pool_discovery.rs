//! Pool discovery: venue-program log subscriptions plus a Dexscreener
//! listing poll, both feeding `NewPoolEvent`s to the orchestrator.

use futures::StreamExt;
use serde_json::Value;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcTransactionConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_client::rpc_response::RpcLogsResponse;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{UiTransactionEncoding, UiTransactionTokenBalance};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{BotError, Result};
use crate::gateway::ProviderGateway;
use crate::listener::{monitored_programs, DiscoveryEvent, NewPoolEvent, SignatureDeduper};
use crate::tokens;

/// Log substrings that indicate a pool initialization across the monitored
/// venues.
const POOL_INIT_PATTERNS: &[&str] = &[
    "initialize2",
    "Instruction: Initialize2",
    "create_pool",
    "Instruction: CreatePool",
    "InitializeLbPair",
    "initialize_pool",
    "Instruction: InitializePool",
];

const SUBSCRIPTION_STAGGER: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PoolDiscoveryConfig {
    pub dexscreener_url: String,
    pub poll_interval: Duration,
    /// One small probe quote per unseen listing: 1 USDC at 100 bps.
    pub probe_amount: u64,
    pub probe_slippage_bps: u16,
    pub max_probes_per_cycle: usize,
}

impl Default for PoolDiscoveryConfig {
    fn default() -> Self {
        Self {
            dexscreener_url: "https://api.dexscreener.com".to_string(),
            poll_interval: Duration::from_secs(30),
            probe_amount: 1_000_000,
            probe_slippage_bps: 100,
            max_probes_per_cycle: 3,
        }
    }
}

pub struct PoolDiscoveryListener {
    ws_url: String,
    rpc: Arc<RpcClient>,
    gateway: Arc<ProviderGateway>,
    http: reqwest::Client,
    cfg: PoolDiscoveryConfig,
    events: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
    seen_sigs: Mutex<SignatureDeduper>,
    seen_tokens: Mutex<HashSet<String>>,
}

impl PoolDiscoveryListener {
    pub fn new(
        ws_url: String,
        rpc: Arc<RpcClient>,
        gateway: Arc<ProviderGateway>,
        cfg: PoolDiscoveryConfig,
        events: mpsc::Sender<DiscoveryEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            ws_url,
            rpc,
            gateway,
            http,
            cfg,
            events,
            running,
            seen_sigs: Mutex::new(SignatureDeduper::default()),
            seen_tokens: Mutex::new(HashSet::new()),
        })
    }

    /// Start one log-subscription task per monitored program (staggered to
    /// avoid rate-limit rejection) plus the listing poll task.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (i, (name, program)) in monitored_programs().into_iter().enumerate() {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(SUBSCRIPTION_STAGGER * i as u32).await;
                this.run_log_subscription(name, program).await;
            }));
        }
        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            this.run_listing_poll().await;
        }));
        handles
    }

    async fn run_log_subscription(&self, name: &'static str, program: Pubkey) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.subscribe_once(name, &program).await {
                debug!("pool log subscription {name} error: {e}");
            }
            if self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    async fn subscribe_once(&self, name: &'static str, program: &Pubkey) -> Result<()> {
        let client = PubsubClient::new(&self.ws_url)
            .await
            .map_err(|e| BotError::ChainError { err: e.to_string() })?;
        let (mut stream, _unsubscribe) = client
            .logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![program.to_string()]),
                RpcTransactionLogsConfig {
                    commitment: Some(CommitmentConfig::confirmed()),
                },
            )
            .await
            .map_err(|e| BotError::ChainError { err: e.to_string() })?;
        info!("pool log subscription active: {name}");

        while let Some(update) = stream.next().await {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            self.handle_logs(update.value).await;
        }
        Ok(())
    }

    async fn handle_logs(&self, logs: RpcLogsResponse) {
        if logs.err.is_some() {
            return;
        }
        let hit = logs
            .logs
            .iter()
            .any(|line| POOL_INIT_PATTERNS.iter().any(|p| line.contains(p)));
        if !hit {
            return;
        }
        if !self.seen_sigs.lock().await.insert(&logs.signature) {
            return;
        }

        match self.extract_mints(&logs.signature).await {
            Ok(mints) if mints.len() >= 2 => {
                info!(
                    "new pool detected: {} ({} mints)",
                    logs.signature,
                    mints.len()
                );
                let event = DiscoveryEvent::NewPool(NewPoolEvent {
                    signature: Some(logs.signature),
                    mints,
                    source: "logs",
                });
                let _ = self.events.send(event).await;
            }
            Ok(_) => {}
            Err(e) => debug!("pool tx parse failed for {}: {e}", logs.signature),
        }
    }

    /// Distinct mints appearing in the transaction's token-balance records.
    async fn extract_mints(&self, signature: &str) -> Result<Vec<Pubkey>> {
        let sig = Signature::from_str(signature)
            .map_err(|_| BotError::ChainError { err: format!("bad signature {signature}") })?;
        let tx = self
            .rpc
            .get_transaction_with_config(&sig, RpcTransactionConfig {
                encoding: Some(UiTransactionEncoding::JsonParsed),
                commitment: Some(CommitmentConfig::confirmed()),
                max_supported_transaction_version: Some(0),
            })
            .await?;
        let Some(meta) = tx.transaction.meta else {
            return Ok(Vec::new());
        };

        let mut mints: Vec<Pubkey> = Vec::new();
        for balance in balances(&meta.pre_token_balances)
            .iter()
            .chain(balances(&meta.post_token_balances))
        {
            if let Ok(mint) = Pubkey::from_str(&balance.mint) {
                if !mints.contains(&mint) {
                    mints.push(mint);
                }
            }
        }
        Ok(mints)
    }

    // ── HTTP polling strategy ──

    async fn run_listing_poll(&self) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once().await {
                debug!("pair listing poll error: {e}");
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    async fn poll_once(&self) -> Result<()> {
        let mut candidates = self.fetch_token_profiles().await.unwrap_or_else(|e| {
            debug!("token-profiles fetch failed: {e}");
            Vec::new()
        });
        match self.fetch_pair_search().await {
            Ok(more) => candidates.extend(more),
            Err(e) => debug!("dex search fetch failed: {e}"),
        }

        let usdc = tokens::usdc();
        let mut probed = 0usize;
        for address in candidates {
            if probed >= self.cfg.max_probes_per_cycle {
                break;
            }
            {
                let mut seen = self.seen_tokens.lock().await;
                if !seen.insert(address.clone()) {
                    continue;
                }
            }
            let Ok(mint) = Pubkey::from_str(&address) else {
                continue;
            };
            probed += 1;

            // One small direct-route quote decides whether the token is
            // routable at all.
            match self
                .gateway
                .quote(&usdc, &mint, self.cfg.probe_amount, self.cfg.probe_slippage_bps, true)
                .await
            {
                Ok(q) if q.out_amount > 0 => {
                    info!("listing probe routable: {address}");
                    let event = DiscoveryEvent::NewPool(NewPoolEvent {
                        signature: None,
                        mints: vec![usdc, mint],
                        source: "dexscreener",
                    });
                    let _ = self.events.send(event).await;
                }
                Ok(_) => {}
                Err(e) => debug!("listing probe failed for {address}: {e}"),
            }
        }
        Ok(())
    }

    async fn fetch_token_profiles(&self) -> Result<Vec<String>> {
        let url = format!("{}/token-profiles/latest/v1", self.cfg.dexscreener_url);
        let body: Value = self.http.get(&url).send().await?.json().await?;
        let out = body
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.get("chainId").and_then(Value::as_str) == Some("solana"))
                    .filter_map(|e| e.get("tokenAddress").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(out)
    }

    async fn fetch_pair_search(&self) -> Result<Vec<String>> {
        let url = format!("{}/latest/dex/search", self.cfg.dexscreener_url);
        let body: Value = self
            .http
            .get(&url)
            .query(&[("q", "solana")])
            .send()
            .await?
            .json()
            .await?;
        let out = body
            .get("pairs")
            .and_then(Value::as_array)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter(|p| p.get("chainId").and_then(Value::as_str) == Some("solana"))
                    .filter_map(|p| p.pointer("/baseToken/address").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(out)
    }
}

pub(crate) fn balances(
    opt: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
) -> &[UiTransactionTokenBalance] {
    match opt {
        OptionSerializer::Some(v) => v,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_patterns_catch_known_venues() {
        let raydium = "Program log: Instruction: Initialize2";
        let meteora = "Program log: InitializeLbPair";
        let unrelated = "Program log: Instruction: Swap";
        let matched = |line: &str| POOL_INIT_PATTERNS.iter().any(|p| line.contains(p));
        assert!(matched(raydium));
        assert!(matched(meteora));
        assert!(!matched(unrelated));
    }
}
