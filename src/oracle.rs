//! Pyth price-feed reader.
//!
//! Advisory only: quote deviation against the oracle is logged, never
//! blocking, and reads are cached so the oracle stays out of the hot path.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use crate::tokens;

/// Pyth V2 price-account layout offsets.
const OFFSET_EXPONENT: usize = 20;
const OFFSET_VALID_SLOT: usize = 40;
const OFFSET_AGG_PRICE: usize = 208;
const OFFSET_AGG_CONF: usize = 216;
const MIN_ACCOUNT_LEN: usize = OFFSET_AGG_CONF + 8;

/// Slots before a feed is considered stale (~30 s at 400 ms slots).
const STALENESS_SLOTS: u64 = 75;

const CACHE_TTL: Duration = Duration::from_secs(5);

/// Deviation above this is logged as a warning.
pub const DEVIATION_WARN_BPS: i64 = 100;

/// (symbol, pyth price account) for the feeds worth watching.
const PRICE_FEEDS: &[(&str, &str)] = &[
    ("SOL", "H6ARHf6YXhGYeQfUzQNGk6rDNnLBQKrenN712K4AQJEG"),
    ("USDC", "Gnt27xtC473ZT2Mw5u8wZ68Z3gULkSTb5DuxJy7eJotD"),
    ("USDT", "3vxLXJqLqF3JG5TCbYycbKWRBbCJQLxQmBGCkyqEEefL"),
    ("MSOL", "E4v1BBgoso9s64TQvmyownAVJbhbEPGyzA3qn4n46qj9"),
    ("JITOSOL", "7yyaeuJ1GGtVBLT2z2xub5ZWYKaNhF28mj1RdV4VDFVk"),
    ("BONK", "8ihFLu5FimgTQ1Unh4dVyEHUGodJ5gJQCrQf4KUVB9bN"),
    ("JUP", "g6eRCbboSwK4tSWngn773RCMexr1APQr4uA9bGZBYfo"),
];

#[derive(Debug, Clone, Copy)]
pub struct OraclePrice {
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub slot: u64,
    pub stale: bool,
}

impl OraclePrice {
    pub fn as_f64(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.exponent)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviationReport {
    pub deviation_bps: i64,
    pub dex_price: f64,
    pub oracle_price: f64,
    pub stale: bool,
}

/// Decode `(price, conf, exponent, valid_slot)` from a Pyth V2 account.
pub fn decode_price_account(data: &[u8], current_slot: u64) -> Result<OraclePrice> {
    if data.len() < MIN_ACCOUNT_LEN {
        return Err(BotError::ChainError {
            err: format!("price account too short: {} bytes", data.len()),
        });
    }
    let exponent = i32::from_le_bytes(data[OFFSET_EXPONENT..OFFSET_EXPONENT + 4].try_into().unwrap());
    let slot = u64::from_le_bytes(data[OFFSET_VALID_SLOT..OFFSET_VALID_SLOT + 8].try_into().unwrap());
    let price = i64::from_le_bytes(data[OFFSET_AGG_PRICE..OFFSET_AGG_PRICE + 8].try_into().unwrap());
    let conf = u64::from_le_bytes(data[OFFSET_AGG_CONF..OFFSET_AGG_CONF + 8].try_into().unwrap());
    Ok(OraclePrice {
        price,
        conf,
        exponent,
        slot,
        stale: current_slot.saturating_sub(slot) > STALENESS_SLOTS,
    })
}

pub struct OracleReader {
    rpc: Arc<RpcClient>,
    feeds: HashMap<Pubkey, Pubkey>,
    cache: Mutex<HashMap<Pubkey, (OraclePrice, Instant)>>,
}

impl OracleReader {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        let mut feeds = HashMap::new();
        for (symbol, feed) in PRICE_FEEDS {
            if let (Ok(mint), Ok(feed)) = (
                tokens::resolve_mint(symbol),
                Pubkey::from_str(feed),
            ) {
                feeds.insert(mint, feed);
            }
        }
        Self {
            rpc,
            feeds,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Oracle price for a mint, or `None` when no feed is configured or the
    /// read fails. Cached for 5 s per feed.
    pub async fn price(&self, mint: &Pubkey) -> Option<OraclePrice> {
        let feed = *self.feeds.get(mint)?;
        {
            let cache = self.cache.lock().await;
            if let Some((price, at)) = cache.get(mint) {
                if at.elapsed() <= CACHE_TTL {
                    return Some(*price);
                }
            }
        }
        let price = match self.read_feed(&feed).await {
            Ok(p) => p,
            Err(e) => {
                debug!("oracle read failed for {mint}: {e}");
                return None;
            }
        };
        debug!(
            "oracle {}: price={} conf={} expo={} slot={} stale={}",
            tokens::label_for_mint(mint),
            price.price,
            price.conf,
            price.exponent,
            price.slot,
            price.stale,
        );
        self.cache.lock().await.insert(*mint, (price, Instant::now()));
        Some(price)
    }

    async fn read_feed(&self, feed: &Pubkey) -> Result<OraclePrice> {
        let slot = self.rpc.get_slot().await?;
        let account = self.rpc.get_account(feed).await?;
        decode_price_account(&account.data, slot)
    }

    /// Compare a DEX quote against the oracle cross rate. Returns `None`
    /// when either side lacks a feed. Deviations above 100 bps are logged,
    /// never blocking.
    pub async fn validate_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        in_amount: u64,
        out_amount: u64,
    ) -> Option<DeviationReport> {
        if in_amount == 0 || out_amount == 0 {
            return None;
        }
        let in_price = self.price(input_mint).await?;
        let out_price = self.price(output_mint).await?;
        if in_price.price <= 0 || out_price.price <= 0 {
            return None;
        }

        let in_dec = tokens::decimals_for_mint(input_mint) as i32;
        let out_dec = tokens::decimals_for_mint(output_mint) as i32;
        let dex_price = (out_amount as f64 / 10f64.powi(out_dec))
            / (in_amount as f64 / 10f64.powi(in_dec));
        let oracle_price = in_price.as_f64() / out_price.as_f64();

        let deviation_bps =
            ((dex_price - oracle_price) / oracle_price * 10_000.0).round() as i64;
        let report = DeviationReport {
            deviation_bps,
            dex_price,
            oracle_price,
            stale: in_price.stale || out_price.stale,
        };

        if report.deviation_bps.abs() > DEVIATION_WARN_BPS {
            warn!(
                "oracle deviation {}{} bps on {}->{} (dex {:.6} vs oracle {:.6}{})",
                if report.deviation_bps > 0 { "+" } else { "" },
                report.deviation_bps,
                tokens::label_for_mint(input_mint),
                tokens::label_for_mint(output_mint),
                report.dex_price,
                report.oracle_price,
                if report.stale { ", stale feed" } else { "" },
            );
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_feed(price: i64, conf: u64, exponent: i32, valid_slot: u64) -> Vec<u8> {
        let mut data = vec![0u8; MIN_ACCOUNT_LEN];
        data[OFFSET_EXPONENT..OFFSET_EXPONENT + 4].copy_from_slice(&exponent.to_le_bytes());
        data[OFFSET_VALID_SLOT..OFFSET_VALID_SLOT + 8].copy_from_slice(&valid_slot.to_le_bytes());
        data[OFFSET_AGG_PRICE..OFFSET_AGG_PRICE + 8].copy_from_slice(&price.to_le_bytes());
        data[OFFSET_AGG_CONF..OFFSET_AGG_CONF + 8].copy_from_slice(&conf.to_le_bytes());
        data
    }

    #[test]
    fn decodes_fixed_offsets() {
        let data = synthetic_feed(14_012_345_678, 9_876_543, -8, 1_000);
        let p = decode_price_account(&data, 1_010).unwrap();
        assert_eq!(p.price, 14_012_345_678);
        assert_eq!(p.conf, 9_876_543);
        assert_eq!(p.exponent, -8);
        assert_eq!(p.slot, 1_000);
        assert!(!p.stale);
        assert!((p.as_f64() - 140.12345678).abs() < 1e-9);
    }

    #[test]
    fn marks_stale_past_threshold() {
        let data = synthetic_feed(1, 0, 0, 1_000);
        let fresh = decode_price_account(&data, 1_000 + STALENESS_SLOTS).unwrap();
        assert!(!fresh.stale);
        let stale = decode_price_account(&data, 1_000 + STALENESS_SLOTS + 1).unwrap();
        assert!(stale.stale);
    }

    #[test]
    fn rejects_truncated_account() {
        assert!(decode_price_account(&[0u8; 100], 0).is_err());
    }
}
