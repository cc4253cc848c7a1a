//! Opportunity shapes shared by the scanners, the listeners and the
//! composer. Scanners only emit complete opportunities: the quotes that
//! priced a cycle travel with it, so the composer never re-prices.

pub mod pairs;
pub mod triangular;

use solana_sdk::pubkey::Pubkey;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::gateway::quote::Quote;
use crate::profit::GasParams;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parameters shared by every scan call in a cycle.
#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    pub flash_fee_bps: u16,
    pub min_profit_bps: i32,
    pub slippage_bps: u16,
    pub gas: GasParams,
}

#[derive(Debug, Clone)]
pub struct TwoLegOpportunity {
    pub pair: String,
    /// The borrowed (quote) token.
    pub token_a: Pubkey,
    /// The target token.
    pub token_b: Pubkey,
    pub borrow_amount: u64,
    pub leg1_out: u64,
    pub leg2_out: u64,
    pub flash_fee: u64,
    pub sol_costs_in_token: u64,
    pub expected_profit: i128,
    pub profit_bps: i32,
    pub price_impact_leg1: f64,
    pub price_impact_leg2: f64,
    pub timestamp_ms: u64,
    pub quote_leg1: Quote,
    pub quote_leg2: Quote,
}

impl TwoLegOpportunity {
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.timestamp_ms)
    }
}

#[derive(Debug, Clone)]
pub struct TriangularRoute {
    pub name: &'static str,
    /// The borrowed token; the cycle is a -> b -> c -> a.
    pub token_a: Pubkey,
    pub token_b: Pubkey,
    pub token_c: Pubkey,
    pub borrow_amount: u64,
}

#[derive(Debug, Clone)]
pub struct TriangularOpportunity {
    pub route: TriangularRoute,
    pub leg1_out: u64,
    pub leg2_out: u64,
    pub leg3_out: u64,
    pub flash_fee: u64,
    pub sol_costs_in_token: u64,
    pub expected_profit: i128,
    pub profit_bps: i32,
    pub timestamp_ms: u64,
    pub quote_leg1: Quote,
    pub quote_leg2: Quote,
    pub quote_leg3: Quote,
}

impl TriangularOpportunity {
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.timestamp_ms)
    }
}
