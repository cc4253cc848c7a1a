//! Backrun listener: watches venue logs for swap activity, parses token
//! balance deltas of large trades, and emits probe signals.

use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcTransactionConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_client::rpc_response::RpcLogsResponse;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::{UiTransactionEncoding, UiTransactionTokenBalance};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{BotError, Result};
use crate::listener::pool_discovery::balances;
use crate::listener::{monitored_programs, BackrunSignal, DiscoveryEvent, SignatureDeduper};
use crate::tokens;

const SWAP_LOG_PATTERNS: &[&str] = &[
    "Instruction: Swap",
    "Instruction: SwapV2",
    "Instruction: SwapBaseIn",
    "swap_base_in",
    "Instruction: SwapExactInput",
];

/// Parsed-transaction fetches are expensive; cap them to 3 per 10 s window.
const PARSE_WINDOW: Duration = Duration::from_secs(10);
const PARSES_PER_WINDOW: usize = 3;

/// "Large" thresholds: 1_000 USDC (6 decimals) or 5 SOL (9 decimals).
const LARGE_USDC: u64 = 1_000_000_000;
const LARGE_WSOL: u64 = 5_000_000_000;

const SUBSCRIPTION_STAGGER: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSwap {
    pub token_in: Pubkey,
    pub token_out: Pubkey,
    pub amount_in: u64,
    pub amount_out: u64,
}

/// Sum balance deltas per mint and pick the dominant out/in pair. At least
/// one side must be USDC or wSOL; multi-hop transactions can mis-identify
/// the pair, which is tolerable for a probe-only signal.
pub fn classify_swap(
    pre: &[UiTransactionTokenBalance],
    post: &[UiTransactionTokenBalance],
) -> Option<ParsedSwap> {
    let mut deltas: HashMap<Pubkey, i128> = HashMap::new();
    for b in pre {
        let (mint, amount) = parse_balance(b)?;
        *deltas.entry(mint).or_default() -= amount;
    }
    for b in post {
        let (mint, amount) = parse_balance(b)?;
        *deltas.entry(mint).or_default() += amount;
    }

    let token_out = deltas
        .iter()
        .filter(|(_, d)| **d > 0)
        .max_by_key(|(_, d)| **d)
        .map(|(m, d)| (*m, *d as u64))?;
    let token_in = deltas
        .iter()
        .filter(|(_, d)| **d < 0)
        .min_by_key(|(_, d)| **d)
        .map(|(m, d)| (*m, d.unsigned_abs() as u64))?;
    if token_in.0 == token_out.0 {
        return None;
    }

    let usdc = tokens::usdc();
    let wsol = tokens::wsol();
    let anchored = [token_in.0, token_out.0]
        .iter()
        .any(|m| *m == usdc || *m == wsol);
    if !anchored {
        return None;
    }

    Some(ParsedSwap {
        token_in: token_in.0,
        token_out: token_out.0,
        amount_in: token_in.1,
        amount_out: token_out.1,
    })
}

pub fn is_large(swap: &ParsedSwap) -> bool {
    let usdc = tokens::usdc();
    let wsol = tokens::wsol();
    let side = |mint: &Pubkey, amount: u64| {
        (*mint == usdc && amount > LARGE_USDC) || (*mint == wsol && amount > LARGE_WSOL)
    };
    side(&swap.token_in, swap.amount_in) || side(&swap.token_out, swap.amount_out)
}

fn parse_balance(b: &UiTransactionTokenBalance) -> Option<(Pubkey, i128)> {
    let mint = Pubkey::from_str(&b.mint).ok()?;
    let amount = b.ui_token_amount.amount.parse::<i128>().ok()?;
    Some((mint, amount))
}

pub struct BackrunListener {
    ws_url: String,
    rpc: Arc<RpcClient>,
    events: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
    seen_sigs: Mutex<SignatureDeduper>,
    parse_times: Mutex<VecDeque<Instant>>,
}

impl BackrunListener {
    pub fn new(
        ws_url: String,
        rpc: Arc<RpcClient>,
        events: mpsc::Sender<DiscoveryEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ws_url,
            rpc,
            events,
            running,
            seen_sigs: Mutex::new(SignatureDeduper::default()),
            parse_times: Mutex::new(VecDeque::new()),
        }
    }

    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        monitored_programs()
            .into_iter()
            .enumerate()
            .map(|(i, (name, program))| {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(SUBSCRIPTION_STAGGER * i as u32).await;
                    this.run_log_subscription(name, program).await;
                })
            })
            .collect()
    }

    async fn run_log_subscription(&self, name: &'static str, program: Pubkey) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.subscribe_once(name, &program).await {
                debug!("backrun subscription {name} error: {e}");
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
        info!("backrun log subscription active: {name}");

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
            .any(|line| SWAP_LOG_PATTERNS.iter().any(|p| line.contains(p)));
        if !hit {
            return;
        }
        if !self.seen_sigs.lock().await.insert(&logs.signature) {
            return;
        }
        if !self.admit_parse().await {
            return;
        }

        match self.parse_swap(&logs.signature).await {
            Ok(Some(swap)) if is_large(&swap) => {
                info!(
                    "large swap {}: {} {} -> {} {}",
                    logs.signature,
                    swap.amount_in,
                    tokens::label_for_mint(&swap.token_in),
                    swap.amount_out,
                    tokens::label_for_mint(&swap.token_out),
                );
                let event = DiscoveryEvent::Backrun(BackrunSignal {
                    signature: logs.signature,
                    token_in: swap.token_in,
                    token_out: swap.token_out,
                    amount_in: swap.amount_in,
                    amount_out: swap.amount_out,
                });
                let _ = self.events.send(event).await;
            }
            Ok(_) => {}
            Err(e) => debug!("backrun parse failed for {}: {e}", logs.signature),
        }
    }

    /// Sliding-window admission for parsed-transaction fetches.
    async fn admit_parse(&self) -> bool {
        let mut times = self.parse_times.lock().await;
        let now = Instant::now();
        while times
            .front()
            .map(|t| now.duration_since(*t) > PARSE_WINDOW)
            .unwrap_or(false)
        {
            times.pop_front();
        }
        if times.len() >= PARSES_PER_WINDOW {
            return false;
        }
        times.push_back(now);
        true
    }

    async fn parse_swap(&self, signature: &str) -> Result<Option<ParsedSwap>> {
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
            return Ok(None);
        };
        Ok(classify_swap(
            balances(&meta.pre_token_balances),
            balances(&meta.post_token_balances),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_account_decoder::parse_token::UiTokenAmount;
    use solana_transaction_status::option_serializer::OptionSerializer;

    fn balance(mint: &Pubkey, amount: u64) -> UiTransactionTokenBalance {
        UiTransactionTokenBalance {
            account_index: 0,
            mint: mint.to_string(),
            ui_token_amount: UiTokenAmount {
                ui_amount: None,
                decimals: 6,
                amount: amount.to_string(),
                ui_amount_string: String::new(),
            },
            owner: OptionSerializer::None,
            program_id: OptionSerializer::None,
        }
    }

    #[test]
    fn classifies_usdc_buy() {
        let usdc = tokens::usdc();
        let meme = Pubkey::new_unique();
        // trader spends 2_000 USDC, receives 1M meme units
        let pre = vec![balance(&usdc, 5_000_000_000), balance(&meme, 0)];
        let post = vec![balance(&usdc, 3_000_000_000), balance(&meme, 1_000_000)];
        let swap = classify_swap(&pre, &post).unwrap();
        assert_eq!(swap.token_in, usdc);
        assert_eq!(swap.token_out, meme);
        assert_eq!(swap.amount_in, 2_000_000_000);
        assert_eq!(swap.amount_out, 1_000_000);
        assert!(is_large(&swap));
    }

    #[test]
    fn small_swaps_are_not_large() {
        let usdc = tokens::usdc();
        let meme = Pubkey::new_unique();
        let pre = vec![balance(&usdc, 100_000_000), balance(&meme, 0)];
        let post = vec![balance(&usdc, 50_000_000), balance(&meme, 77)];
        let swap = classify_swap(&pre, &post).unwrap();
        assert!(!is_large(&swap));
    }

    #[test]
    fn rejects_swaps_without_usdc_or_sol_side() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let pre = vec![balance(&a, 1_000), balance(&b, 0)];
        let post = vec![balance(&a, 0), balance(&b, 900)];
        assert!(classify_swap(&pre, &post).is_none());
    }

    #[test]
    fn wsol_threshold_uses_lamports() {
        let wsol = tokens::wsol();
        let meme = Pubkey::new_unique();
        let pre = vec![balance(&wsol, 10_000_000_000), balance(&meme, 0)];
        let post = vec![balance(&wsol, 3_000_000_000), balance(&meme, 5)];
        let swap = classify_swap(&pre, &post).unwrap();
        assert_eq!(swap.amount_in, 7_000_000_000);
        assert!(is_large(&swap));
    }

    #[tokio::test]
    async fn parse_admission_caps_the_window() {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let (tx, _rx) = mpsc::channel(8);
        let listener = BackrunListener::new(
            "ws://localhost:8900".to_string(),
            rpc,
            tx,
            Arc::new(AtomicBool::new(true)),
        );
        assert!(listener.admit_parse().await);
        assert!(listener.admit_parse().await);
        assert!(listener.admit_parse().await);
        assert!(!listener.admit_parse().await);
    }
}
