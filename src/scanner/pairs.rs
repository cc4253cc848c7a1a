//! Two-leg pair scanner: quote borrow -> target -> borrow and keep the
//! spread telemetry even when nothing clears the threshold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::gateway::ProviderGateway;
use crate::profit;
use crate::scanner::{now_ms, ScanParams, TwoLegOpportunity};
use crate::tokens;

/// Spread recorded when the pair has no route at all.
const UNROUTABLE_BPS: i32 = -9_999;

#[derive(Debug)]
pub enum ScanOutcome {
    Opportunity(Box<TwoLegOpportunity>),
    BelowThreshold(i32),
    /// The aggregator found no route for one of the legs.
    Unroutable,
}

#[derive(Debug, Clone, Copy)]
pub struct BestSpread {
    pub bps: i32,
    pub at: Instant,
}

pub struct PairScanner {
    gateway: Arc<ProviderGateway>,
    best_spreads: Mutex<HashMap<String, BestSpread>>,
}

impl PairScanner {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self {
            gateway,
            best_spreads: Mutex::new(HashMap::new()),
        }
    }

    /// Scan one pair at one borrow size. Unroutable legs and sub-threshold
    /// spreads are outcomes, not errors; real failures propagate.
    pub async fn scan_pair(
        &self,
        pair: &str,
        borrow: u64,
        params: &ScanParams,
    ) -> Result<ScanOutcome> {
        let (target, quote_mint) = tokens::parse_pair(pair)?;

        // Leg 1: borrow token -> target
        let q1 = match self
            .gateway
            .quote(&quote_mint, &target, borrow, params.slippage_bps, false)
            .await
        {
            Ok(q) => q,
            Err(e) if e.is_no_opportunity() => {
                self.record_spread(pair, UNROUTABLE_BPS).await;
                return Ok(ScanOutcome::Unroutable);
            }
            Err(e) => return Err(e),
        };

        // Leg 2: target -> borrow token, sized by leg 1's output
        let q2 = match self
            .gateway
            .quote(&target, &quote_mint, q1.out_amount, params.slippage_bps, false)
            .await
        {
            Ok(q) => q,
            Err(e) if e.is_no_opportunity() => {
                self.record_spread(pair, UNROUTABLE_BPS).await;
                return Ok(ScanOutcome::Unroutable);
            }
            Err(e) => return Err(e),
        };

        let breakdown = profit::compute_profit(
            borrow,
            q1.out_amount,
            q2.out_amount,
            params.flash_fee_bps,
            &params.gas,
            &quote_mint,
            &target,
        );
        self.record_spread(pair, breakdown.profit_bps).await;

        if breakdown.profit_bps < params.min_profit_bps {
            debug!(
                "{pair}: {:+} bps (threshold {}), borrow={borrow}, via={}",
                breakdown.profit_bps,
                params.min_profit_bps,
                q1.source.as_str(),
            );
            return Ok(ScanOutcome::BelowThreshold(breakdown.profit_bps));
        }

        let route_desc = |q: &crate::gateway::quote::Quote| {
            q.route_plan
                .iter()
                .map(|leg| format!("{}:{}", leg.label.as_deref().unwrap_or("?"), leg.percent))
                .collect::<Vec<_>>()
                .join(",")
        };
        info!(
            "OPPORTUNITY {pair}: {:+} bps, profit={}, fee={}, borrow={borrow}, via={}, routes=[{}|{}]",
            breakdown.profit_bps,
            breakdown.expected_profit,
            breakdown.flash_fee,
            q1.source.as_str(),
            route_desc(&q1),
            route_desc(&q2),
        );

        Ok(ScanOutcome::Opportunity(Box::new(TwoLegOpportunity {
            pair: pair.to_string(),
            token_a: quote_mint,
            token_b: target,
            borrow_amount: borrow,
            leg1_out: q1.out_amount,
            leg2_out: q2.out_amount,
            flash_fee: breakdown.flash_fee,
            sol_costs_in_token: breakdown.gas_in_token,
            expected_profit: breakdown.expected_profit,
            profit_bps: breakdown.profit_bps,
            price_impact_leg1: q1.price_impact_pct,
            price_impact_leg2: q2.price_impact_pct,
            timestamp_ms: now_ms(),
            quote_leg1: q1,
            quote_leg2: q2,
        })))
    }

    async fn record_spread(&self, pair: &str, bps: i32) {
        let mut spreads = self.best_spreads.lock().await;
        let entry = spreads.get(pair).copied();
        match entry {
            Some(best) if best.bps >= bps => {}
            _ => {
                spreads.insert(pair.to_string(), BestSpread {
                    bps,
                    at: Instant::now(),
                });
            }
        }
    }

    pub async fn best_spread(&self, pair: &str) -> Option<BestSpread> {
        self.best_spreads.lock().await.get(pair).copied()
    }

    /// Best observed spread per pair, newest first.
    pub async fn spread_summary(&self) -> Vec<(String, i32, u64)> {
        let spreads = self.best_spreads.lock().await;
        let mut out: Vec<(String, i32, u64)> = spreads
            .iter()
            .map(|(pair, best)| (pair.clone(), best.bps, best.at.elapsed().as_secs()))
            .collect();
        out.sort_by_key(|(_, _, age)| *age);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use solana_client::nonblocking::rpc_client::RpcClient;

    fn scanner() -> PairScanner {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let gateway =
            Arc::new(ProviderGateway::new(rpc, GatewayConfig::default()).unwrap());
        PairScanner::new(gateway)
    }

    #[tokio::test]
    async fn spread_table_keeps_the_maximum() {
        let s = scanner();
        s.record_spread("SOL/USDC", -12).await;
        s.record_spread("SOL/USDC", 7).await;
        s.record_spread("SOL/USDC", 3).await;
        assert_eq!(s.best_spread("SOL/USDC").await.unwrap().bps, 7);
        assert!(s.best_spread("JUP/USDC").await.is_none());
    }
}
