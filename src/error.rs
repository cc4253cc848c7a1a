use solana_client::client_error::ClientError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retriable 4xx from a quote or block-engine endpoint.
    #[error("Provider request failed: HTTP {status}: {body}")]
    ProviderRequest { status: u16, body: String },

    /// 429 or provider-specific throttling, surfaced after retries are exhausted.
    #[error("Provider rate limited")]
    ProviderRateLimited,

    #[error("Request timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// Aggregator returned a zero output. "No opportunity" at the scanner
    /// layer, never fatal.
    #[error("No route for requested swap")]
    NoRoute,

    #[error("Quotes stale: {age_ms} ms old (max {max_ms} ms)")]
    QuotesStale { age_ms: u64, max_ms: u64 },

    #[error("Transaction too large: {bytes} bytes (max {max})")]
    TransactionTooLarge { bytes: usize, max: usize },

    #[error("Simulation failed ({units} CU): {logs_tail:?}")]
    SimulationFailed { logs_tail: Vec<String>, units: u64 },

    #[error("On-chain error: {err}")]
    ChainError { err: String },

    #[error("Preflight failed: {0}")]
    PreflightFailed(String),

    #[error("Flash loan pool is paused")]
    PoolPaused,

    #[error("Insufficient pool liquidity: {deposits} deposited, {requested} requested")]
    InsufficientLiquidity { deposits: u64, requested: u64 },

    #[error("Unauthorized: signer is not the pool admin")]
    Unauthorized,
}

impl BotError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn wallet(msg: impl Into<String>) -> Self {
        Self::Wallet(msg.into())
    }

    /// True for errors a scanner treats as "nothing here" rather than a
    /// failed cycle.
    pub fn is_no_opportunity(&self) -> bool {
        matches!(self, Self::NoRoute)
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
