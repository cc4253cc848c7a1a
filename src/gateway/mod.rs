//! Rate-limited provider gateway.
//!
//! Single process-wide instance wrapping the Raydium trade API (keyless,
//! Cloudflare-fronted, tried first) and the Jupiter swap API (keyed, 1 RPS
//! on the basic tier, behind a token bucket). All quote traffic from
//! scanners, listeners and the composer goes through here.

pub mod limiter;
pub mod quote;

use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use limiter::TokenBucket;
use quote::{Quote, SwapInstructionBundle, SwapInstructionsResponse};

const QUOTE_CACHE_TTL: Duration = Duration::from_secs(5);
const QUOTE_CACHE_CAP: usize = 200;
const ALT_FETCH_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub jupiter_url: String,
    pub raydium_url: String,
    pub jupiter_api_key: Option<String>,
    pub use_raydium: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub cooldown_ms: u64,
    pub max_accounts: u32,
    /// Minimum spacing between Raydium requests, to stay under Cloudflare's
    /// anonymous-client threshold.
    pub raydium_min_interval_ms: u64,
    /// Token-bucket shape for the Jupiter API.
    pub bucket_capacity: f64,
    pub bucket_refill_per_sec: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            jupiter_url: "https://api.jup.ag/swap/v1".to_string(),
            raydium_url: "https://transaction-v1.raydium.io".to_string(),
            jupiter_api_key: None,
            use_raydium: true,
            timeout_ms: 8_000,
            max_retries: 1,
            backoff_base_ms: 500,
            cooldown_ms: 60_000,
            max_accounts: 40,
            raydium_min_interval_ms: 1_200,
            bucket_capacity: 3.0,
            bucket_refill_per_sec: 0.9,
        }
    }
}

type CacheKey = (Pubkey, Pubkey, u64);

struct CachedQuote {
    quote: Quote,
    at: Instant,
}

#[derive(Default)]
struct QuoteCache {
    entries: HashMap<CacheKey, CachedQuote>,
}

impl QuoteCache {
    fn get(&self, key: &CacheKey) -> Option<&Quote> {
        self.entries
            .get(key)
            .filter(|c| c.at.elapsed() <= QUOTE_CACHE_TTL)
            .map(|c| &c.quote)
    }

    fn put(&mut self, key: CacheKey, quote: Quote) {
        self.entries.insert(key, CachedQuote {
            quote,
            at: Instant::now(),
        });
        if self.entries.len() > QUOTE_CACHE_CAP {
            self.evict();
        }
    }

    /// Drop expired entries first; if still over cap, drop the oldest.
    fn evict(&mut self) {
        self.entries.retain(|_, c| c.at.elapsed() <= QUOTE_CACHE_TTL);
        while self.entries.len() > QUOTE_CACHE_CAP {
            let oldest = self
                .entries
                .iter()
                .max_by_key(|(_, c)| c.at.elapsed())
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => self.entries.remove(&k),
                None => break,
            };
        }
    }

    fn drain(&mut self) {
        self.entries.clear();
    }
}

pub struct ProviderGateway {
    http: reqwest::Client,
    rpc: Arc<RpcClient>,
    cfg: GatewayConfig,
    limiter: TokenBucket,
    cache: Mutex<QuoteCache>,
    raydium_cooldown_until: Mutex<Option<Instant>>,
    raydium_last_request: Mutex<Option<Instant>>,
}

impl ProviderGateway {
    pub fn new(rpc: Arc<RpcClient>, cfg: GatewayConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &cfg.jupiter_api_key {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|_| BotError::config("invalid Jupiter API key"))?;
            headers.insert("x-api-key", value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        let limiter = TokenBucket::new(cfg.bucket_capacity, cfg.bucket_refill_per_sec);
        Ok(Self {
            http,
            rpc,
            cfg,
            limiter,
            cache: Mutex::new(QuoteCache::default()),
            raydium_cooldown_until: Mutex::new(None),
            raydium_last_request: Mutex::new(None),
        })
    }

    // ── Quotes ──

    /// Best available quote: cache, then Raydium (unless cooling down), then
    /// Jupiter under the rate limiter.
    pub async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<Quote> {
        if amount == 0 {
            return Err(BotError::NoRoute);
        }
        let key = (*input_mint, *output_mint, amount);
        if let Some(q) = self.cache.lock().await.get(&key) {
            return Ok(q.clone());
        }

        if self.cfg.use_raydium && self.raydium_available().await {
            match self
                .raydium_quote(input_mint, output_mint, amount, slippage_bps)
                .await
            {
                Ok(q) => {
                    self.cache.lock().await.put(key, q.clone());
                    return Ok(q);
                }
                Err(BotError::ProviderRateLimited) => {
                    // Raydium's cooldown is independent of the Jupiter
                    // bucket; the fallback below must not wait for a refill.
                    self.begin_raydium_cooldown().await;
                }
                Err(e) => {
                    debug!("Raydium quote failed, falling back to Jupiter: {e}");
                }
            }
        }

        let q = self
            .jupiter_quote(input_mint, output_mint, amount, slippage_bps, direct_only)
            .await?;
        self.cache.lock().await.put(key, q.clone());
        Ok(q)
    }

    /// Jupiter-only quote. Used when the caller needs a quote whose raw blob
    /// can be posted back for swap instructions.
    pub async fn aggregator_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<Quote> {
        if amount == 0 {
            return Err(BotError::NoRoute);
        }
        let key = (*input_mint, *output_mint, amount);
        {
            let cache = self.cache.lock().await;
            if let Some(q) = cache.get(&key) {
                if q.supports_swap_instructions() {
                    return Ok(q.clone());
                }
            }
        }
        let q = self
            .jupiter_quote(input_mint, output_mint, amount, slippage_bps, direct_only)
            .await?;
        self.cache.lock().await.put(key, q.clone());
        Ok(q)
    }

    async fn raydium_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        self.pace_raydium().await;

        let url = format!("{}/compute/swap-base-in", self.cfg.raydium_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("txVersion", "V0".to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.map_http_err(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_http_err(e))?;
        if status.as_u16() == 429 || status.as_u16() == 403 || body.contains("error code: 1015") {
            return Err(BotError::ProviderRateLimited);
        }
        if !status.is_success() {
            return Err(BotError::ProviderRequest {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }
        let value: Value = serde_json::from_str(&body).map_err(|_| BotError::NoRoute)?;
        Quote::from_raydium(value, input_mint, output_mint, slippage_bps)
    }

    async fn jupiter_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<Quote> {
        let url = format!("{}/quote", self.cfg.jupiter_url);
        let mut params = vec![
            ("inputMint", input_mint.to_string()),
            ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", slippage_bps.to_string()),
            ("maxAccounts", self.cfg.max_accounts.to_string()),
        ];
        if direct_only {
            params.push(("onlyDirectRoutes", "true".to_string()));
        }
        let raw = self
            .jupiter_request(|| self.http.get(&url).query(&params))
            .await?;
        Quote::from_jupiter(raw, input_mint, output_mint, slippage_bps)
    }

    // ── Swap instructions ──

    /// Fetch the per-leg instruction bundle for a quote. The quote's raw
    /// response is posted back verbatim.
    pub async fn swap_instructions(
        &self,
        quote: &Quote,
        user: &Pubkey,
        wrap_native: bool,
        use_token_ledger: bool,
    ) -> Result<SwapInstructionBundle> {
        if !quote.supports_swap_instructions() {
            return Err(BotError::ProviderRequest {
                status: 400,
                body: "swap instructions require an aggregator quote".to_string(),
            });
        }
        let url = format!("{}/swap-instructions", self.cfg.jupiter_url);
        let body = json!({
            "quoteResponse": quote.raw.clone(),
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": wrap_native,
            "useTokenLedger": use_token_ledger,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": 0,
        });
        let raw = self
            .jupiter_request(|| self.http.post(&url).json(&body))
            .await?;
        let resp: SwapInstructionsResponse =
            serde_json::from_value(raw).map_err(|e| BotError::ProviderRequest {
                status: 200,
                body: format!("unexpected swap-instructions shape: {e}"),
            })?;
        resp.decode()
    }

    /// Jupiter request with rate limiting, cooldown-aware retries and
    /// exponential back-off. 4xx other than 429 surface immediately.
    async fn jupiter_request<F>(&self, build: F) -> Result<Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut rate_limited = false;
        for attempt in 0..=self.cfg.max_retries {
            self.limiter.acquire().await;
            let resp = match build().send().await {
                Ok(r) => r,
                Err(e) => return Err(self.map_http_err(e)),
            };
            let status = resp.status();

            if status.as_u16() == 429 {
                rate_limited = true;
                self.limiter.drain().await;
                if attempt < self.cfg.max_retries {
                    let delay = self.cfg.backoff_base_ms * (1 << attempt);
                    debug!("Jupiter 429, backing off {delay} ms (attempt {attempt})");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                break;
            }

            if status.is_server_error() {
                let body = resp.text().await.unwrap_or_default();
                if attempt < self.cfg.max_retries {
                    let delay = self.cfg.backoff_base_ms * (1 << attempt);
                    warn!("Jupiter {status}, retrying in {delay} ms: {}", truncate(&body, 120));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                return Err(BotError::ProviderRequest {
                    status: status.as_u16(),
                    body: truncate(&body, 200),
                });
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(BotError::ProviderRequest {
                    status: status.as_u16(),
                    body: truncate(&body, 200),
                });
            }

            return resp.json::<Value>().await.map_err(|e| self.map_http_err(e));
        }

        if rate_limited {
            Err(BotError::ProviderRateLimited)
        } else {
            Err(BotError::ProviderRequest {
                status: 0,
                body: "retries exhausted".to_string(),
            })
        }
    }

    // ── Address lookup tables ──

    /// Load lookup tables by address, deduplicated, fetched in batches.
    pub async fn load_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>> {
        let mut unique: Vec<Pubkey> = Vec::new();
        for addr in addresses {
            if !unique.contains(addr) {
                unique.push(*addr);
            }
        }
        let mut tables = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(ALT_FETCH_BATCH) {
            let accounts = self.rpc.get_multiple_accounts(chunk).await?;
            for (key, account) in chunk.iter().zip(accounts) {
                let Some(account) = account else {
                    debug!("lookup table {key} not found, skipping");
                    continue;
                };
                match AddressLookupTable::deserialize(&account.data) {
                    Ok(table) => tables.push(AddressLookupTableAccount {
                        key: *key,
                        addresses: table.addresses.to_vec(),
                    }),
                    Err(e) => debug!("lookup table {key} failed to decode: {e:?}"),
                }
            }
        }
        debug!("loaded {}/{} lookup tables", tables.len(), unique.len());
        Ok(tables)
    }

    // ── Cooldown / cache state ──

    pub async fn raydium_available(&self) -> bool {
        match *self.raydium_cooldown_until.lock().await {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        }
    }

    async fn begin_raydium_cooldown(&self) {
        let until = Instant::now() + Duration::from_millis(self.cfg.cooldown_ms);
        *self.raydium_cooldown_until.lock().await = Some(until);
        warn!("Raydium rate-limited, cooling down {} ms", self.cfg.cooldown_ms);
    }

    async fn pace_raydium(&self) {
        let min_interval = Duration::from_millis(self.cfg.raydium_min_interval_ms);
        let wait = {
            let last = self.raydium_last_request.lock().await;
            last.map(|t| min_interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.raydium_last_request.lock().await = Some(Instant::now());
    }

    pub async fn drain_quote_cache(&self) {
        self.cache.lock().await.drain();
    }

    fn map_http_err(&self, e: reqwest::Error) -> BotError {
        if e.is_timeout() {
            BotError::Timeout {
                ms: self.cfg.timeout_ms,
            }
        } else {
            BotError::Http(e)
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_quote(input: Pubkey, output: Pubkey, amount: u64) -> Quote {
        Quote::from_jupiter(
            json!({
                "inputMint": input.to_string(),
                "outputMint": output.to_string(),
                "inAmount": amount.to_string(),
                "outAmount": "42",
            }),
            &input,
            &output,
            50,
        )
        .unwrap()
    }

    #[test]
    fn cache_hit_within_ttl_is_structurally_equal() {
        let mut cache = QuoteCache::default();
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let q = dummy_quote(input, output, 1_000);
        cache.put((input, output, 1_000), q.clone());
        let hit = cache.get(&(input, output, 1_000)).unwrap();
        assert_eq!(hit.out_amount, q.out_amount);
        assert_eq!(hit.raw, q.raw);
        // a different amount is a different key
        assert!(cache.get(&(input, output, 2_000)).is_none());
    }

    #[test]
    fn cache_evicts_beyond_cap() {
        let mut cache = QuoteCache::default();
        let output = Pubkey::new_unique();
        for i in 0..(QUOTE_CACHE_CAP + 20) {
            let input = Pubkey::new_unique();
            cache.put((input, output, i as u64), dummy_quote(input, output, i as u64));
        }
        assert!(cache.entries.len() <= QUOTE_CACHE_CAP);
    }

    #[test]
    fn cache_drain_empties() {
        let mut cache = QuoteCache::default();
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        cache.put((input, output, 1), dummy_quote(input, output, 1));
        cache.drain();
        assert!(cache.get(&(input, output, 1)).is_none());
    }

    #[tokio::test]
    async fn cooldown_blocks_raydium_until_window_expires() {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let cfg = GatewayConfig {
            cooldown_ms: 40,
            ..GatewayConfig::default()
        };
        let gw = ProviderGateway::new(rpc, cfg).unwrap();
        assert!(gw.raydium_available().await);
        gw.begin_raydium_cooldown().await;
        assert!(!gw.raydium_available().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gw.raydium_available().await);
    }
}
