//! Triangular scanner: a static catalog of USDC -> A -> B -> USDC routes,
//! scanned as a rotating batch each cycle.
//!
//! Quotes are sequential (each leg depends on the previous output) and
//! direct-route-only so the composed transaction stays under the wire size
//! limit. The first route past the threshold wins; triangular hits are rare
//! enough that fanning out would waste rate budget.

use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::gateway::ProviderGateway;
use crate::profit;
use crate::scanner::{now_ms, ScanParams, TriangularOpportunity, TriangularRoute};
use crate::tokens;

/// (name, leg-b symbol, leg-c symbol, borrow in USDC units)
const ROUTE_CATALOG: &[(&str, &str, &str, u64)] = &[
    // SOL-hub blue chips
    ("sol-jup", "SOL", "JUP", 100_000_000),
    ("sol-ray", "SOL", "RAY", 100_000_000),
    ("sol-orca", "SOL", "ORCA", 100_000_000),
    ("sol-jto", "SOL", "JTO", 100_000_000),
    ("sol-pyth", "SOL", "PYTH", 50_000_000),
    ("sol-render", "SOL", "RENDER", 50_000_000),
    // LST triangles (depeg routes)
    ("msol-sol", "MSOL", "SOL", 100_000_000),
    ("jitosol-sol", "JITOSOL", "SOL", 100_000_000),
    ("bsol-sol", "BSOL", "SOL", 50_000_000),
    ("inf-sol", "INF", "SOL", 50_000_000),
    ("msol-jitosol", "MSOL", "JITOSOL", 50_000_000),
    // Meme triangles
    ("sol-bonk", "SOL", "BONK", 20_000_000),
    ("sol-wif", "SOL", "WIF", 20_000_000),
    ("sol-popcat", "SOL", "POPCAT", 20_000_000),
    ("sol-mew", "SOL", "MEW", 20_000_000),
    ("sol-trump", "SOL", "TRUMP", 20_000_000),
    ("sol-fartcoin", "SOL", "FARTCOIN", 20_000_000),
    ("bonk-wif", "BONK", "WIF", 20_000_000),
    // Stablecoin triangles
    ("usdt-sol", "USDT", "SOL", 200_000_000),
    ("sol-usdt", "SOL", "USDT", 200_000_000),
    ("usdt-jup", "USDT", "JUP", 100_000_000),
    // Reverse direction of the hub routes
    ("jup-sol", "JUP", "SOL", 100_000_000),
    ("ray-sol", "RAY", "SOL", 100_000_000),
    ("orca-sol", "ORCA", "SOL", 100_000_000),
    ("jto-sol", "JTO", "SOL", 100_000_000),
    ("bonk-sol", "BONK", "SOL", 20_000_000),
    ("wif-sol", "WIF", "SOL", 20_000_000),
    // No-hub triangles
    ("jup-ray", "JUP", "RAY", 50_000_000),
    ("jup-jto", "JUP", "JTO", 50_000_000),
    ("msol-bsol", "MSOL", "BSOL", 50_000_000),
];

/// Routes scanned per cycle.
const BATCH_SIZE: usize = 10;

pub struct TriangularScanner {
    gateway: Arc<ProviderGateway>,
    routes: Vec<TriangularRoute>,
    offset: AtomicUsize,
}

impl TriangularScanner {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        let usdc = tokens::usdc();
        let routes = ROUTE_CATALOG
            .iter()
            .filter_map(|(name, b, c, borrow)| {
                let token_b = tokens::resolve_mint(b).ok()?;
                let token_c = tokens::resolve_mint(c).ok()?;
                Some(TriangularRoute {
                    name,
                    token_a: usdc,
                    token_b,
                    token_c,
                    borrow_amount: *borrow,
                })
            })
            .collect();
        Self {
            gateway,
            routes,
            offset: AtomicUsize::new(0),
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Distinct mints appearing anywhere in the catalog.
    pub fn catalog_mints(&self) -> Vec<Pubkey> {
        let mut mints: Vec<Pubkey> = Vec::new();
        for route in &self.routes {
            for mint in [route.token_a, route.token_b, route.token_c] {
                if !mints.contains(&mint) {
                    mints.push(mint);
                }
            }
        }
        mints
    }

    /// The routes covered by the next scan call, advancing the rotation.
    fn next_batch(&self) -> Vec<TriangularRoute> {
        let len = self.routes.len();
        if len == 0 {
            return Vec::new();
        }
        let start = self.offset.fetch_add(BATCH_SIZE, Ordering::Relaxed) % len;
        (0..BATCH_SIZE.min(len))
            .map(|i| self.routes[(start + i) % len].clone())
            .collect()
    }

    /// Scan the current batch; the first route past the threshold wins.
    pub async fn scan(&self, params: &ScanParams) -> Result<Option<TriangularOpportunity>> {
        for route in self.next_batch() {
            match self.scan_route(&route, params).await {
                Ok(Some(opp)) => return Ok(Some(opp)),
                Ok(None) => {}
                Err(e) if e.is_no_opportunity() => {}
                Err(e) => {
                    debug!("triangular {} failed: {e}", route.name);
                }
            }
        }
        Ok(None)
    }

    async fn scan_route(
        &self,
        route: &TriangularRoute,
        params: &ScanParams,
    ) -> Result<Option<TriangularOpportunity>> {
        let slippage = params.slippage_bps;
        let q1 = self
            .gateway
            .quote(&route.token_a, &route.token_b, route.borrow_amount, slippage, true)
            .await?;
        let q2 = self
            .gateway
            .quote(&route.token_b, &route.token_c, q1.out_amount, slippage, true)
            .await?;
        let q3 = self
            .gateway
            .quote(&route.token_c, &route.token_a, q2.out_amount, slippage, true)
            .await?;

        let breakdown = profit::compute_profit(
            route.borrow_amount,
            q1.out_amount,
            q3.out_amount,
            params.flash_fee_bps,
            &params.gas,
            &route.token_a,
            &route.token_b,
        );

        if breakdown.profit_bps < params.min_profit_bps {
            debug!(
                "triangle {}: {:+} bps (threshold {})",
                route.name, breakdown.profit_bps, params.min_profit_bps
            );
            return Ok(None);
        }

        info!(
            "TRIANGLE {}: {}->{}->{}, {:+} bps, profit={}",
            route.name,
            tokens::label_for_mint(&route.token_a),
            tokens::label_for_mint(&route.token_b),
            tokens::label_for_mint(&route.token_c),
            breakdown.profit_bps,
            breakdown.expected_profit,
        );

        Ok(Some(TriangularOpportunity {
            route: route.clone(),
            leg1_out: q1.out_amount,
            leg2_out: q2.out_amount,
            leg3_out: q3.out_amount,
            flash_fee: breakdown.flash_fee,
            sol_costs_in_token: breakdown.gas_in_token,
            expected_profit: breakdown.expected_profit,
            profit_bps: breakdown.profit_bps,
            timestamp_ms: now_ms(),
            quote_leg1: q1,
            quote_leg2: q2,
            quote_leg3: q3,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use solana_client::nonblocking::rpc_client::RpcClient;
    use std::collections::HashSet;

    fn scanner() -> TriangularScanner {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let gateway =
            Arc::new(ProviderGateway::new(rpc, GatewayConfig::default()).unwrap());
        TriangularScanner::new(gateway)
    }

    #[test]
    fn catalog_resolves_every_route() {
        let s = scanner();
        assert_eq!(s.route_count(), ROUTE_CATALOG.len());
        for route in &s.routes {
            assert_eq!(route.token_a, tokens::usdc());
            assert_ne!(route.token_b, route.token_c);
            assert!(route.borrow_amount > 0);
        }
    }

    #[test]
    fn rotation_covers_all_routes_and_wraps() {
        let s = scanner();
        let cycles = (s.route_count() + BATCH_SIZE - 1) / BATCH_SIZE;
        let mut seen = HashSet::new();
        for _ in 0..cycles {
            for route in s.next_batch() {
                seen.insert(route.name);
            }
        }
        assert_eq!(seen.len(), s.route_count());
        // next batch after a full rotation starts over without panicking
        assert_eq!(s.next_batch().len(), BATCH_SIZE);
    }
}
