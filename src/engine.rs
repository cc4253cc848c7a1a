//! Orchestrator: preflight, the main scan loop, the execution sub-pipeline
//! and the kill switch.
//!
//! The loop is strictly sequential across scan phases and never runs two
//! executions concurrently; the flash-loan receipt PDA admits only one
//! outstanding borrow per signer, so the signer is a critical section.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::composer::{ComposeParams, ComposedTransaction, TransactionComposer};
use crate::config::Config;
use crate::error::{BotError, Result};
use crate::fees::FeeStrategy;
use crate::flash_loan::FlashLoanClient;
use crate::gateway::{GatewayConfig, ProviderGateway};
use crate::jito::JitoClient;
use crate::listener::backrun::BackrunListener;
use crate::listener::pool_discovery::{PoolDiscoveryConfig, PoolDiscoveryListener};
use crate::listener::{BackrunSignal, DiscoveryEvent, NewPoolEvent};
use crate::metrics::BotMetrics;
use crate::oracle::OracleReader;
use crate::profit::{self, GasParams};
use crate::scanner::pairs::{PairScanner, ScanOutcome};
use crate::scanner::triangular::TriangularScanner;
use crate::scanner::{ScanParams, TriangularOpportunity, TwoLegOpportunity};
use crate::tokens;

/// Pairs scanned every cycle; the rest rotate through a cold batch.
const HOT_PAIRS: &[&str] = &[
    "SOL/USDC", "MSOL/USDC", "JITOSOL/USDC", "BSOL/USDC",
    "JUP/USDC", "TRUMP/USDC", "ORCA/USDC", "INF/USDC",
];
const COLD_BATCH: usize = 8;

const PROBE_SIZES: [u64; 2] = [50_000_000, 500_000_000];
const SNIPE_SIZES: [u64; 2] = [10_000_000, 100_000_000];
const BACKRUN_SIZES: [u64; 2] = [50_000_000, 500_000_000];
const DYNAMIC_SCAN_SIZE: u64 = 50_000_000;
const DYNAMIC_MAX_UNROUTABLE: u32 = 5;

/// 0.05 SOL gas floor checked at preflight.
const GAS_FLOOR_LAMPORTS: u64 = 50_000_000;

const METRICS_INTERVAL: Duration = Duration::from_secs(60);
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONFIRM_MAX_POLLS: u32 = 30;

const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Consecutive-failure counter driving the loop shutdown.
#[derive(Debug)]
pub struct KillSwitch {
    consecutive: u32,
    max: u32,
}

impl KillSwitch {
    pub fn new(max: u32) -> Self {
        Self {
            consecutive: 0,
            max,
        }
    }

    /// Returns true when the threshold is reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.max
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[derive(Debug, Default)]
struct DynamicPair {
    consecutive_unroutable: u32,
}

pub struct Engine {
    config: Config,
    rpc: Arc<RpcClient>,
    signer: Arc<Keypair>,
    gateway: Arc<ProviderGateway>,
    oracle: OracleReader,
    flash_loan: Arc<FlashLoanClient>,
    jito: Option<JitoClient>,
    composer: TransactionComposer,
    pair_scanner: PairScanner,
    tri_scanner: TriangularScanner,
    fee_strategy: FeeStrategy,
    pub metrics: Arc<BotMetrics>,
    running: Arc<AtomicBool>,
    kill_switch: KillSwitch,
    pool_fee_bps: u16,
    dynamic_pairs: HashMap<String, DynamicPair>,
    cold_offset: usize,
    skipped_mints: HashSet<Pubkey>,
    ensured_atas: HashSet<Pubkey>,
    borrow_ata: Pubkey,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let signer = Arc::new(config.load_keypair()?);
        let rpc = Arc::new(RpcClient::new_with_commitment(
            config.rpc_url.clone(),
            CommitmentConfig::confirmed(),
        ));

        let gateway_cfg = GatewayConfig {
            jupiter_api_key: config.jupiter_api_key.clone(),
            ..GatewayConfig::default()
        };
        let gateway = Arc::new(ProviderGateway::new(Arc::clone(&rpc), gateway_cfg)?);

        let flash_loan = Arc::new(FlashLoanClient::new(
            Arc::clone(&rpc),
            &config.flash_loan_program_id,
            &config.flash_loan_token_mint,
        )?);

        let jito = if config.use_jito {
            Some(JitoClient::new(&config.jito_region)?)
        } else {
            None
        };

        // The flash-loan token is a classic SPL token; its ATA address is a
        // pure function of (owner, mint).
        let borrow_ata = spl_associated_token_account::get_associated_token_address(
            &signer.pubkey(),
            &flash_loan.token_mint,
        );

        let composer = TransactionComposer::new(
            Arc::clone(&rpc),
            Arc::clone(&gateway),
            Arc::clone(&flash_loan),
            Arc::clone(&signer),
            borrow_ata,
        );

        let fee_strategy = FeeStrategy {
            base_cu_price: config.priority_fee_micro_lamports,
            compute_units: config.compute_unit_limit,
            ..FeeStrategy::default()
        };

        Ok(Self {
            oracle: OracleReader::new(Arc::clone(&rpc)),
            pair_scanner: PairScanner::new(Arc::clone(&gateway)),
            tri_scanner: TriangularScanner::new(Arc::clone(&gateway)),
            kill_switch: KillSwitch::new(config.max_consecutive_failures),
            metrics: Arc::new(BotMetrics::new()),
            running: Arc::new(AtomicBool::new(true)),
            pool_fee_bps: 9,
            dynamic_pairs: HashMap::new(),
            cold_offset: 0,
            skipped_mints: HashSet::new(),
            ensured_atas: HashSet::new(),
            borrow_ata,
            config,
            rpc,
            signer,
            gateway,
            flash_loan,
            jito,
            composer,
            fee_strategy,
        })
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    // ── Admin path ──

    /// One-shot `update_pool_config`; requires the pool admin keypair.
    pub async fn update_pool_fee(&self, new_fee_bps: u16) -> Result<()> {
        let state = self.flash_loan.get_pool_state().await?;
        if state.admin != self.signer.pubkey() {
            return Err(BotError::Unauthorized);
        }
        let ix = self
            .flash_loan
            .build_update_pool_ix(&self.signer.pubkey(), Some(new_fee_bps), None);
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&self.signer.pubkey()),
            &[self.signer.as_ref()],
            blockhash,
        );
        let sig = self.rpc.send_and_confirm_transaction(&tx).await?;
        info!("pool fee updated to {new_fee_bps} bps: {sig}");
        Ok(())
    }

    // ── Startup ──

    pub async fn run(&mut self) -> Result<()> {
        info!("=== Solana Flash Loan Arbitrage Bot ===");
        info!(
            "Pairs: {} | Borrow: {} | MinProfit: {} bps | DryRun: {}",
            self.config.pairs.len(),
            self.config.borrow_amount,
            self.config.min_profit_bps,
            self.config.dry_run,
        );
        info!(
            "Jito: {} | Wallet: {} | Started: {}",
            self.config.use_jito,
            self.signer.pubkey(),
            self.metrics.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        info!("borrow token ATA: {}", self.borrow_ata);
        if let Some(jito) = &self.jito {
            info!("block engine: {}", jito.endpoint());
        }

        self.preflight().await?;

        let (events_tx, mut events_rx) = mpsc::channel::<DiscoveryEvent>(256);
        let _listener_handles = self.spawn_listeners(events_tx)?;

        let metrics = Arc::clone(&self.metrics);
        let metrics_running = Arc::clone(&self.running);
        let _metrics_handle: JoinHandle<()> = tokio::spawn(async move {
            while metrics_running.load(Ordering::Relaxed) {
                tokio::time::sleep(METRICS_INTERVAL).await;
                info!("METRICS: {}", metrics.summary());
            }
        });

        info!("scanning started");
        while self.running.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            self.metrics.incr(&self.metrics.scan_cycles);

            match self.run_cycle(&mut events_rx).await {
                Ok(()) => self.kill_switch.record_success(),
                Err(e) => {
                    error!(
                        "scan cycle error: {e} (consecutive={})",
                        self.kill_switch.consecutive() + 1
                    );
                    // Quotes cached during a failed cycle are suspect.
                    self.gateway.drain_quote_cache().await;
                    if self.kill_switch.record_failure() {
                        error!("KILL SWITCH: too many consecutive failures, stopping");
                        self.stop();
                        break;
                    }
                }
            }

            let elapsed = cycle_start.elapsed();
            let target = Duration::from_millis(self.config.poll_interval_ms);
            if elapsed < target && self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(target - elapsed).await;
            }
        }

        for (pair, bps, age_secs) in self.pair_scanner.spread_summary().await {
            info!("best spread {pair}: {bps:+} bps ({age_secs}s ago)");
        }
        info!("FINAL METRICS: {}", self.metrics.summary());
        info!("bot stopped");
        Ok(())
    }

    async fn preflight(&mut self) -> Result<()> {
        // Gas floor
        let balance = self.rpc.get_balance(&self.signer.pubkey()).await?;
        info!("SOL balance: {:.4}", balance as f64 / 1e9);
        if balance < GAS_FLOOR_LAMPORTS {
            if self.config.dry_run {
                warn!("balance below 0.05 SOL gas floor (dry run, continuing)");
            } else {
                return Err(BotError::PreflightFailed(format!(
                    "balance {balance} lamports below 0.05 SOL gas floor"
                )));
            }
        }

        // Flash-loan pool state
        match self.flash_loan.get_pool_state().await {
            Ok(state) => {
                self.pool_fee_bps = state.fee_basis_points;
                info!(
                    "flash loan pool: {:.2} USDC deposited, {} shares, {:.2} USDC fees earned, fee={} bps, active={}",
                    state.total_deposits as f64 / 1e6,
                    state.total_shares,
                    state.total_fees_earned as f64 / 1e6,
                    state.fee_basis_points,
                    state.is_active,
                );
                if state.token_mint != self.flash_loan.token_mint {
                    warn!(
                        "pool token mint {} does not match configured mint {}",
                        state.token_mint, self.flash_loan.token_mint
                    );
                }
                if state.vault != self.flash_loan.vault_pda {
                    warn!(
                        "pool vault {} does not match derived vault PDA {}",
                        state.vault, self.flash_loan.vault_pda
                    );
                }
                if !state.is_active {
                    warn!("{}", BotError::PoolPaused);
                }
                if state.total_deposits < self.config.borrow_amount {
                    warn!(
                        "{}",
                        BotError::InsufficientLiquidity {
                            deposits: state.total_deposits,
                            requested: self.config.borrow_amount,
                        }
                    );
                }
            }
            Err(e) => warn!("could not fetch pool state: {e}"),
        }

        // Associated token accounts for every mint we may touch. A failure
        // skips the affected pair, never the startup.
        let mut mints: Vec<Pubkey> = vec![self.flash_loan.token_mint];
        for pair in &self.config.pairs {
            if let Ok((target, quote)) = tokens::parse_pair(pair) {
                for mint in [target, quote] {
                    if !mints.contains(&mint) {
                        mints.push(mint);
                    }
                }
            }
        }
        for mint in self.tri_scanner.catalog_mints() {
            if !mints.contains(&mint) {
                mints.push(mint);
            }
        }
        for mint in mints {
            if let Err(e) = self.ensure_ata(&mint).await {
                warn!(
                    "ATA setup failed for {}, skipping its pairs: {e}",
                    tokens::label_for_mint(&mint)
                );
                self.skipped_mints.insert(mint);
            }
        }

        // Quote connectivity check
        match self
            .gateway
            .quote(&tokens::usdc(), &tokens::wsol(), 200_000_000, 50, false)
            .await
        {
            Ok(q) => info!(
                "quote test OK: 200 USDC -> {:.4} SOL via {}",
                q.out_amount as f64 / 1e9,
                q.source.as_str()
            ),
            Err(e) => warn!("quote test failed: {e}"),
        }

        Ok(())
    }

    fn spawn_listeners(
        &self,
        events_tx: mpsc::Sender<DiscoveryEvent>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let Some(ws_url) = self.config.ws_url.clone() else {
            info!("no websocket URL configured, discovery listeners disabled");
            return Ok(Vec::new());
        };

        let mut handles = Vec::new();
        let discovery = Arc::new(PoolDiscoveryListener::new(
            ws_url.clone(),
            Arc::clone(&self.rpc),
            Arc::clone(&self.gateway),
            PoolDiscoveryConfig::default(),
            events_tx.clone(),
            Arc::clone(&self.running),
        )?);
        handles.extend(discovery.spawn());

        let backrun = Arc::new(BackrunListener::new(
            ws_url,
            Arc::clone(&self.rpc),
            events_tx,
            Arc::clone(&self.running),
        ));
        handles.extend(backrun.spawn());
        info!("discovery listeners started ({} tasks)", handles.len());
        Ok(handles)
    }

    // ── Scan cycle ──

    fn scan_params(&self) -> ScanParams {
        ScanParams {
            flash_fee_bps: self.pool_fee_bps,
            min_profit_bps: self.config.min_profit_bps,
            slippage_bps: self.config.max_slippage_bps,
            gas: GasParams {
                priority_fee_micro: self.config.priority_fee_micro_lamports,
                cu_limit: self.config.compute_unit_limit,
                tip_lamports: self.config.jito_tip_lamports,
                use_tip: self.config.use_jito,
            },
        }
    }

    async fn run_cycle(&mut self, events_rx: &mut mpsc::Receiver<DiscoveryEvent>) -> Result<()> {
        // Discovery events posted since the last cycle run on this task.
        while let Ok(event) = events_rx.try_recv() {
            self.handle_event(event).await;
        }

        // Hot pairs every cycle, plus a rotating cold batch.
        let (hot, cold): (Vec<String>, Vec<String>) = self
            .config
            .pairs
            .iter()
            .cloned()
            .partition(|p| HOT_PAIRS.contains(&p.as_str()));
        let mut batch = hot;
        if !cold.is_empty() {
            for i in 0..COLD_BATCH.min(cold.len()) {
                batch.push(cold[(self.cold_offset + i) % cold.len()].clone());
            }
            self.cold_offset = (self.cold_offset + COLD_BATCH) % cold.len();
        }

        for pair in batch {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            if self.pair_is_skipped(&pair) {
                continue;
            }
            if let Some(opp) = self.probe_pair(&pair, &PROBE_SIZES).await? {
                self.metrics.incr(&self.metrics.opportunities_found);
                self.dispatch_two_leg(*opp).await;
            }
        }

        self.scan_dynamic_pairs().await;

        // Triangular batch, once per cycle.
        let params = self.scan_params();
        if let Some(opp) = self.tri_scanner.scan(&params).await? {
            self.metrics.incr(&self.metrics.triangular_opportunities);
            self.dispatch_triangular(opp).await;
        }

        Ok(())
    }

    fn pair_is_skipped(&self, pair: &str) -> bool {
        tokens::parse_pair(pair)
            .map(|(target, _)| self.skipped_mints.contains(&target))
            .unwrap_or(true)
    }

    /// Probe a pair at several borrow sizes and keep the best opportunity.
    /// Sizes are clamped by the per-target liquidity override.
    async fn probe_pair(
        &self,
        pair: &str,
        sizes: &[u64],
    ) -> Result<Option<Box<TwoLegOpportunity>>> {
        let params = self.scan_params();
        let (target, _) = tokens::parse_pair(pair)?;

        let mut probe_sizes: Vec<u64> = sizes
            .iter()
            .map(|s| (*s).min(tokens::borrow_for_target(&target, *s)))
            .collect();
        probe_sizes.dedup();

        let mut best: Option<Box<TwoLegOpportunity>> = None;
        for borrow in probe_sizes {
            match self.pair_scanner.scan_pair(pair, borrow, &params).await? {
                ScanOutcome::Opportunity(opp) => {
                    // Advisory oracle check on the winning leg.
                    self.oracle
                        .validate_quote(&opp.token_a, &opp.token_b, opp.borrow_amount, opp.leg1_out)
                        .await;
                    if best
                        .as_ref()
                        .map(|b| opp.profit_bps > b.profit_bps)
                        .unwrap_or(true)
                    {
                        best = Some(opp);
                    }
                }
                ScanOutcome::BelowThreshold(_) | ScanOutcome::Unroutable => {}
            }
        }
        Ok(best)
    }

    /// Re-scan dynamic pairs at a single size and evict the persistently
    /// unroutable.
    async fn scan_dynamic_pairs(&mut self) {
        if self.dynamic_pairs.is_empty() {
            return;
        }
        let params = self.scan_params();
        let pairs: Vec<String> = self.dynamic_pairs.keys().cloned().collect();
        for pair in pairs {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            match self
                .pair_scanner
                .scan_pair(&pair, DYNAMIC_SCAN_SIZE, &params)
                .await
            {
                Ok(ScanOutcome::Opportunity(opp)) => {
                    if let Some(state) = self.dynamic_pairs.get_mut(&pair) {
                        state.consecutive_unroutable = 0;
                    }
                    self.metrics.incr(&self.metrics.opportunities_found);
                    self.dispatch_two_leg(*opp).await;
                }
                Ok(ScanOutcome::BelowThreshold(_)) => {
                    if let Some(state) = self.dynamic_pairs.get_mut(&pair) {
                        state.consecutive_unroutable = 0;
                    }
                }
                Ok(ScanOutcome::Unroutable) => {
                    let drop = self
                        .dynamic_pairs
                        .get_mut(&pair)
                        .map(|state| {
                            state.consecutive_unroutable += 1;
                            state.consecutive_unroutable >= DYNAMIC_MAX_UNROUTABLE
                        })
                        .unwrap_or(false);
                    if drop {
                        info!("dropping dynamic pair {pair}: unroutable {DYNAMIC_MAX_UNROUTABLE} scans in a row");
                        self.dynamic_pairs.remove(&pair);
                    }
                }
                Err(e) => debug!("dynamic pair scan failed {pair}: {e}"),
            }
        }
    }

    // ── Discovery event handling ──

    async fn handle_event(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::NewPool(ev) => self.handle_new_pool(ev).await,
            DiscoveryEvent::Backrun(sig) => self.handle_backrun(sig).await,
        }
    }

    async fn handle_new_pool(&mut self, event: NewPoolEvent) {
        self.metrics.incr(&self.metrics.new_pools_detected);
        let known: [Pubkey; 3] = [
            tokens::usdc(),
            tokens::wsol(),
            tokens::resolve_mint("USDT").expect("static mint"),
        ];
        let unknown: Vec<&Pubkey> = event
            .mints
            .iter()
            .filter(|m| !known.contains(m))
            .collect();
        let has_known = event.mints.iter().any(|m| known.contains(m));

        // Both known: already covered by the static list. Neither known:
        // nothing to quote against.
        if unknown.is_empty() || !has_known {
            return;
        }
        // Only USDC-quoted pools become dynamic pairs.
        if !event.mints.contains(&tokens::usdc()) {
            return;
        }

        let target = *unknown[0];
        let pair = format!("{target}/USDC");
        if self.config.pairs.contains(&pair) || self.dynamic_pairs.contains_key(&pair) {
            return;
        }
        info!(
            "dynamic pair added: {pair} (source {}, sig {:?})",
            event.source, event.signature
        );
        self.dynamic_pairs.insert(pair.clone(), DynamicPair::default());

        // Immediate snipe probe at small sizes.
        match self.probe_pair(&pair, &SNIPE_SIZES).await {
            Ok(Some(opp)) => {
                self.metrics.incr(&self.metrics.opportunities_found);
                self.dispatch_two_leg(*opp).await;
            }
            Ok(None) => {}
            Err(e) => debug!("snipe probe failed for {pair}: {e}"),
        }
    }

    async fn handle_backrun(&mut self, signal: BackrunSignal) {
        self.metrics.incr(&self.metrics.backrun_signals);
        let known = [tokens::usdc(), tokens::wsol()];
        let target = [signal.token_out, signal.token_in]
            .into_iter()
            .find(|m| !known.contains(m));
        let Some(target) = target else {
            return;
        };
        let pair = match tokens::symbol_for_mint(&target) {
            Some(sym) => format!("{sym}/USDC"),
            None => format!("{target}/USDC"),
        };
        debug!(
            "backrun probe on {pair} after {} (swap {} -> {})",
            signal.signature, signal.amount_in, signal.amount_out
        );
        match self.probe_pair(&pair, &BACKRUN_SIZES).await {
            Ok(Some(opp)) => {
                self.metrics.incr(&self.metrics.opportunities_found);
                self.dispatch_two_leg(*opp).await;
            }
            Ok(None) => {}
            Err(e) => debug!("backrun probe failed for {pair}: {e}"),
        }
    }

    // ── Execution sub-pipeline ──

    async fn dispatch_two_leg(&mut self, opp: TwoLegOpportunity) {
        if self.config.dry_run {
            info!(
                "DRY RUN: would execute {} {:+} bps, profit={}",
                opp.pair, opp.profit_bps, opp.expected_profit
            );
            return;
        }
        match self.execute_two_leg(&opp).await {
            Ok(()) => {}
            Err(e) if e.is_no_opportunity() => {
                info!("{} went stale before execution", opp.pair);
            }
            Err(e) => {
                self.metrics.incr(&self.metrics.execution_failures);
                warn!("execution failed for {}: {e}", opp.pair);
            }
        }
    }

    async fn dispatch_triangular(&mut self, opp: TriangularOpportunity) {
        if self.config.dry_run {
            info!(
                "DRY RUN TRIANGLE: {} {:+} bps, profit={}",
                opp.route.name, opp.profit_bps, opp.expected_profit
            );
            return;
        }
        match self.execute_triangular(&opp).await {
            Ok(()) => {}
            Err(e) if e.is_no_opportunity() => {
                info!("triangle {} went stale before execution", opp.route.name);
            }
            Err(e) => {
                self.metrics.incr(&self.metrics.execution_failures);
                warn!("triangular execution failed for {}: {e}", opp.route.name);
            }
        }
    }

    async fn execute_two_leg(&mut self, opp: &TwoLegOpportunity) -> Result<()> {
        self.ensure_ata(&opp.token_a).await?;
        self.ensure_ata(&opp.token_b).await?;

        let gross = opp.leg2_out as i128 - opp.borrow_amount as i128;
        let fees = self.fee_strategy.compute(
            gross,
            opp.flash_fee,
            self.sol_price_in_borrow(opp.borrow_amount, opp.leg1_out, &opp.token_b),
        );
        let tip_instruction = self
            .jito
            .as_ref()
            .map(|j| j.build_tip_instruction(&self.signer.pubkey(), fees.tip_lamports));

        info!(
            "EXECUTING {}: {:+} bps, borrow={}, expected_profit={}, gas_in_token={}, \
             impact={:.3}%/{:.3}%, cu_price={}, tip={}",
            opp.pair,
            opp.profit_bps,
            opp.borrow_amount,
            opp.expected_profit,
            opp.sol_costs_in_token,
            opp.price_impact_leg1,
            opp.price_impact_leg2,
            fees.compute_unit_price,
            fees.tip_lamports,
        );

        let params = ComposeParams {
            cu_limit: self.config.compute_unit_limit,
            cu_price: fees.compute_unit_price,
            slippage_bps: self.config.max_slippage_bps,
            tip_instruction,
        };
        let composed = self.composer.compose_two_leg(opp, &params).await?;
        self.submit_and_confirm(&opp.pair, composed, opp.expected_profit, fees.total_sol_cost)
            .await
    }

    async fn execute_triangular(&mut self, opp: &TriangularOpportunity) -> Result<()> {
        let route = &opp.route;
        for mint in [route.token_a, route.token_b, route.token_c] {
            self.ensure_ata(&mint).await?;
        }

        let gross = opp.leg3_out as i128 - route.borrow_amount as i128;
        let fees = self.fee_strategy.compute(
            gross,
            opp.flash_fee,
            self.sol_price_in_borrow(route.borrow_amount, opp.leg1_out, &route.token_b),
        );
        let tip_instruction = self
            .jito
            .as_ref()
            .map(|j| j.build_tip_instruction(&self.signer.pubkey(), fees.tip_lamports));

        info!(
            "EXECUTING TRIANGLE {}: {:+} bps, borrow={}, expected_profit={}, \
             legs={}/{}/{}, gas_in_token={}",
            route.name,
            opp.profit_bps,
            route.borrow_amount,
            opp.expected_profit,
            opp.leg1_out,
            opp.leg2_out,
            opp.leg3_out,
            opp.sol_costs_in_token,
        );

        let params = ComposeParams {
            cu_limit: self.config.compute_unit_limit,
            cu_price: fees.compute_unit_price,
            slippage_bps: self.config.max_slippage_bps,
            tip_instruction,
        };
        let composed = self.composer.compose_triangular(opp, &params).await?;
        let gas_spent = profit::gas_lamports(&GasParams {
            priority_fee_micro: fees.compute_unit_price,
            cu_limit: params.cu_limit.max(crate::composer::TRIANGULAR_MIN_CU_LIMIT),
            tip_lamports: fees.tip_lamports,
            use_tip: self.jito.is_some(),
        });
        self.submit_and_confirm(route.name, composed, opp.expected_profit, gas_spent)
            .await
    }

    fn sol_price_in_borrow(&self, borrow: u64, leg1_out: u64, token_b: &Pubkey) -> u64 {
        if *token_b == tokens::wsol() && leg1_out > 0 {
            (borrow as u128 * 1_000_000_000 / leg1_out as u128) as u64
        } else {
            profit::STATIC_SOL_PRICE_IN_BORROW
        }
    }

    /// build -> simulate -> submit -> confirm, strictly sequential, against
    /// the block reference captured at build time.
    async fn submit_and_confirm(
        &mut self,
        label: &str,
        composed: ComposedTransaction,
        expected_profit: i128,
        gas_spent: u64,
    ) -> Result<()> {
        debug!(
            "submitting against blockhash {} (valid through height {})",
            composed.blockhash, composed.last_valid_block_height
        );

        // Simulate
        let sim = self
            .rpc
            .simulate_transaction_with_config(&composed.tx, RpcSimulateTransactionConfig {
                commitment: Some(CommitmentConfig::confirmed()),
                ..RpcSimulateTransactionConfig::default()
            })
            .await?;
        let units = sim.value.units_consumed.unwrap_or(0);
        if let Some(err) = sim.value.err {
            self.metrics.incr(&self.metrics.simulation_failures);
            let logs_tail = sim
                .value
                .logs
                .unwrap_or_default()
                .into_iter()
                .rev()
                .take(3)
                .collect::<Vec<_>>();
            warn!(
                "{}",
                BotError::SimulationFailed {
                    logs_tail,
                    units,
                }
            );
            debug!("simulation error for {label}: {err:?}");
            return Ok(());
        }
        info!("simulation OK: {units} CU");

        // Submit
        let signature = if let Some(jito) = &self.jito {
            let sig = jito.send_transaction(&composed.tx).await?;
            self.metrics.incr(&self.metrics.jito_submissions);
            Signature::from_str(&sig).map_err(|_| BotError::ChainError {
                err: format!("block engine returned malformed signature: {sig}"),
            })?
        } else {
            self.rpc
                .send_transaction_with_config(&composed.tx, RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(2),
                    ..RpcSendTransactionConfig::default()
                })
                .await?
        };
        info!("TX SENT: {signature} | {label}");

        // Confirm against the build-time block reference
        if self.confirm(&signature, composed.last_valid_block_height).await? {
            self.metrics.incr(&self.metrics.successful_arbs);
            self.metrics.add_profit(expected_profit as i64);
            self.metrics.add_gas(gas_spent);
            info!("TX CONFIRMED: {signature} | profit ~{expected_profit}");
        } else {
            self.metrics.incr(&self.metrics.execution_failures);
            warn!("TX EXPIRED/FAILED: {signature}");
        }
        Ok(())
    }

    /// Poll signature status until confirmed, failed on chain, or the
    /// blockhash expires.
    async fn confirm(&self, signature: &Signature, last_valid_block_height: u64) -> Result<bool> {
        for _ in 0..CONFIRM_MAX_POLLS {
            match self.rpc.get_signature_statuses(&[*signature]).await {
                Ok(resp) => {
                    if let Some(Some(status)) = resp.value.first() {
                        if let Some(err) = &status.err {
                            warn!("{}", BotError::ChainError {
                                err: format!("{err:?}"),
                            });
                            return Ok(false);
                        }
                        if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                            return Ok(true);
                        }
                    }
                    match self.rpc.get_block_height().await {
                        Ok(height) if height > last_valid_block_height => {
                            warn!("blockhash expired before confirmation");
                            return Ok(false);
                        }
                        Ok(_) => {}
                        Err(e) => debug!("block height poll error: {e}"),
                    }
                }
                Err(e) => debug!("confirm poll error: {e}"),
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
        warn!("confirmation timed out");
        Ok(false)
    }

    // ── Token accounts ──

    /// Derive (and create, outside dry-run) the signer's ATA for a mint,
    /// detecting whether the mint belongs to Token or Token-2022.
    async fn ensure_ata(&mut self, mint: &Pubkey) -> Result<Pubkey> {
        let token_2022 = Pubkey::from_str(TOKEN_2022_PROGRAM_ID).expect("static program id");
        let mint_account = self.rpc.get_account(mint).await?;
        let token_program = if mint_account.owner == token_2022 {
            token_2022
        } else {
            spl_token::id()
        };
        let owner = self.signer.pubkey();
        let ata = get_associated_token_address_with_program_id(&owner, mint, &token_program);

        if self.ensured_atas.contains(&ata) {
            return Ok(ata);
        }
        if self.rpc.get_account(&ata).await.is_ok() {
            self.ensured_atas.insert(ata);
            return Ok(ata);
        }

        if self.config.dry_run {
            warn!(
                "ATA missing for {} (dry run, not creating)",
                tokens::label_for_mint(mint)
            );
            return Ok(ata);
        }

        let ix = create_associated_token_account_idempotent(&owner, &owner, mint, &token_program);
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&owner),
            &[self.signer.as_ref()],
            blockhash,
        );
        self.rpc.send_and_confirm_transaction(&tx).await?;
        info!("created ATA {ata} for {}", tokens::label_for_mint(mint));
        self.ensured_atas.insert(ata);
        Ok(ata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_switch_trips_at_threshold() {
        let mut ks = KillSwitch::new(3);
        assert!(!ks.record_failure());
        assert!(!ks.record_failure());
        assert!(ks.record_failure());
    }

    #[test]
    fn kill_switch_resets_on_success() {
        let mut ks = KillSwitch::new(3);
        ks.record_failure();
        ks.record_failure();
        ks.record_success();
        assert_eq!(ks.consecutive(), 0);
        assert!(!ks.record_failure());
        assert!(!ks.record_failure());
        assert!(ks.record_failure());
    }

    #[test]
    fn hot_pairs_are_valid() {
        for pair in HOT_PAIRS {
            tokens::parse_pair(pair).unwrap();
        }
    }
}
