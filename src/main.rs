mod composer;
mod config;
mod engine;
mod error;
mod fees;
mod flash_loan;
mod gateway;
mod jito;
mod listener;
mod metrics;
mod oracle;
mod profit;
mod scanner;
mod tokens;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use engine::Engine;

/// Solana flash-loan arbitrage bot. Every flag also reads its environment
/// counterpart; the flag wins when both are set.
#[derive(Parser, Debug)]
#[command(name = "flasharb", version, about)]
struct Cli {
    /// Solana RPC endpoint
    #[arg(long, env = "RPC_URL")]
    rpc: String,

    /// Websocket endpoint for the discovery listeners
    #[arg(long, env = "WS_URL")]
    ws: Option<String>,

    /// Path to the signer keypair file
    #[arg(long, env = "WALLET_PATH", default_value = "~/.config/solana/id.json")]
    wallet: String,

    /// Comma-separated TARGET/QUOTE pairs
    #[arg(long, env = "PAIRS", value_delimiter = ',', default_value = "SOL/USDC")]
    pairs: Vec<String>,

    /// Default borrow size in flash-token smallest units
    #[arg(long, env = "BORROW_AMOUNT", default_value_t = 200_000_000)]
    borrow_amount: u64,

    /// Admissibility threshold in basis points
    #[arg(long, env = "MIN_PROFIT_BPS", default_value_t = 5)]
    min_profit_bps: i32,

    /// Max slippage per leg, basis points
    #[arg(long, env = "MAX_SLIPPAGE_BPS", default_value_t = 50)]
    slippage: u16,

    /// Scan loop period in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2_000)]
    poll_interval: u64,

    /// Compute-unit price in micro-lamports
    #[arg(long, env = "PRIORITY_FEE", default_value_t = 25_000)]
    priority_fee: u64,

    #[arg(long, env = "COMPUTE_UNIT_LIMIT", default_value_t = 400_000)]
    compute_unit_limit: u32,

    /// Flash-loan program id
    #[arg(long, env = "FLASH_LOAN_PROGRAM_ID", default_value = flash_loan::DEFAULT_PROGRAM_ID)]
    program_id: String,

    /// Flash-loan pool token mint
    #[arg(long, env = "FLASH_LOAN_TOKEN_MINT", default_value = tokens::USDC_MINT)]
    token_mint: String,

    /// Log opportunities without executing
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Submit through the Jito block engine with a tip
    #[arg(long, env = "USE_JITO")]
    tip: bool,

    #[arg(long, env = "JITO_REGION", default_value = "default",
          value_parser = ["default", "ny", "amsterdam", "frankfurt", "tokyo", "slc"])]
    tip_region: String,

    #[arg(long, env = "JITO_TIP_LAMPORTS", default_value_t = 10_000)]
    tip_lamports: u64,

    #[arg(long, env = "JUPITER_API_KEY")]
    jupiter_api_key: Option<String>,

    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value_t = 10)]
    max_consecutive_failures: u32,

    #[arg(long, short)]
    verbose: bool,

    /// Redirect the log sink to a file
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<String>,

    /// One-shot admin action: update the pool fee and exit
    #[arg(long)]
    update_fee_bps: Option<u16>,
}

fn init_logging(verbose: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let update_fee_bps = cli.update_fee_bps;
    let mut config = Config {
        rpc_url: cli.rpc,
        ws_url: cli.ws,
        wallet_path: cli.wallet,
        pairs: cli.pairs,
        borrow_amount: cli.borrow_amount,
        min_profit_bps: cli.min_profit_bps,
        max_slippage_bps: cli.slippage,
        poll_interval_ms: cli.poll_interval,
        priority_fee_micro_lamports: cli.priority_fee,
        compute_unit_limit: cli.compute_unit_limit,
        flash_loan_program_id: cli.program_id,
        flash_loan_token_mint: cli.token_mint,
        dry_run: cli.dry_run,
        use_jito: cli.tip,
        jito_region: cli.tip_region,
        jito_tip_lamports: cli.tip_lamports,
        jupiter_api_key: cli.jupiter_api_key,
        max_consecutive_failures: cli.max_consecutive_failures,
    };
    config.validate().context("invalid configuration")?;

    let mut engine = Engine::new(config).context("engine initialization failed")?;

    if let Some(fee_bps) = update_fee_bps {
        engine
            .update_pool_fee(fee_bps)
            .await
            .context("pool fee update failed")?;
        return Ok(());
    }

    let running = engine.running_flag();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing the current cycle");
        running.store(false, Ordering::Relaxed);
    });

    engine.run().await.context("engine stopped with error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
