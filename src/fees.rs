//! Dynamic fee sizing: better opportunities bid more for inclusion,
//! marginal ones stay at the floor to preserve profit.

use crate::profit::BASE_FEE_LAMPORTS;

const LAMPORTS_PER_SOL: u128 = 1_000_000_000;

/// Never spend more than this share of the profit on fees.
const MAX_FEE_PROFIT_SHARE_PCT: u64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    /// Micro-lamports per compute unit.
    pub compute_unit_price: u64,
    pub tip_lamports: u64,
    /// Estimated base + priority + tip, in lamports.
    pub total_sol_cost: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FeeStrategy {
    pub min_tip_lamports: u64,
    pub max_tip_lamports: u64,
    /// Share of gross profit bid as tip, in percent.
    pub tip_profit_share_pct: u64,
    pub min_cu_price: u64,
    pub max_cu_price: u64,
    pub base_cu_price: u64,
    /// Compute budget assumed when pricing the priority fee.
    pub compute_units: u32,
}

impl Default for FeeStrategy {
    fn default() -> Self {
        Self {
            min_tip_lamports: 1_000,
            max_tip_lamports: 100_000,
            tip_profit_share_pct: 40,
            min_cu_price: 1_000,
            max_cu_price: 200_000,
            base_cu_price: 10_000,
            compute_units: 400_000,
        }
    }
}

impl FeeStrategy {
    /// Compute fees for an opportunity. `gross_profit` is
    /// `leg_final_out - borrow` in borrow-token units, `sol_price_in_token`
    /// the SOL price in the same units.
    pub fn compute(
        &self,
        gross_profit: i128,
        flash_fee: u64,
        sol_price_in_token: u64,
    ) -> FeeParams {
        let net_before_sol = gross_profit - flash_fee as i128;
        if net_before_sol <= 0 || sol_price_in_token == 0 {
            return self.floor_params();
        }

        let profit_in_lamports =
            (net_before_sol as u128 * LAMPORTS_PER_SOL / sol_price_in_token as u128) as u64;

        let raw_tip = profit_in_lamports * self.tip_profit_share_pct / 100;
        let mut tip = raw_tip.clamp(self.min_tip_lamports, self.max_tip_lamports);

        // CU price tiers with the profit margin: marginal hits stay near the
        // base, fat ones bid toward the ceiling.
        let mut cu_price = if profit_in_lamports >= 1_000_000 {
            self.max_cu_price
        } else if profit_in_lamports >= 200_000 {
            self.base_cu_price * 4
        } else if profit_in_lamports >= 50_000 {
            self.base_cu_price * 2
        } else {
            self.base_cu_price
        }
        .clamp(self.min_cu_price, self.max_cu_price);

        let mut total_sol = self.total_sol(cu_price, tip);

        // The combined bid must leave most of the profit intact; scale both
        // components down proportionally when it would not.
        let max_sol_budget = profit_in_lamports * MAX_FEE_PROFIT_SHARE_PCT / 100;
        if total_sol > max_sol_budget && max_sol_budget > 0 {
            tip = ((tip as u128 * max_sol_budget as u128 / total_sol as u128) as u64)
                .max(self.min_tip_lamports);
            cu_price = ((cu_price as u128 * max_sol_budget as u128 / total_sol as u128) as u64)
                .max(self.min_cu_price);
            total_sol = self.total_sol(cu_price, tip);
        }

        FeeParams {
            compute_unit_price: cu_price,
            tip_lamports: tip,
            total_sol_cost: total_sol,
        }
    }

    fn floor_params(&self) -> FeeParams {
        FeeParams {
            compute_unit_price: self.min_cu_price,
            tip_lamports: self.min_tip_lamports,
            total_sol_cost: self.total_sol(self.min_cu_price, self.min_tip_lamports),
        }
    }

    /// Base fee + priority fee + tip, in lamports.
    fn total_sol(&self, cu_price: u64, tip: u64) -> u64 {
        let priority = (cu_price as u128 * self.compute_units as u128 / 1_000_000) as u64;
        BASE_FEE_LAMPORTS + priority + tip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprofitable_uses_floor() {
        let s = FeeStrategy::default();
        let fees = s.compute(-1_000, 900, 140_000_000);
        assert_eq!(fees.tip_lamports, s.min_tip_lamports);
        assert_eq!(fees.compute_unit_price, s.min_cu_price);
        // 5_000 base + 1_000 * 400_000 / 1e6 + 1_000 tip
        assert_eq!(fees.total_sol_cost, 6_400);
    }

    #[test]
    fn tip_is_clamped_to_ceiling() {
        let s = FeeStrategy::default();
        // 100 USDC net profit at $140/SOL dwarfs the tip ceiling
        let fees = s.compute(100_000_000, 0, 140_000_000);
        assert_eq!(fees.tip_lamports, s.max_tip_lamports);
        assert_eq!(fees.compute_unit_price, s.max_cu_price);
    }

    #[test]
    fn healthy_profit_takes_share_uncapped() {
        let s = FeeStrategy::default();
        // 0.014 USDC net -> 100_000 lamports of profit at $140/SOL
        let fees = s.compute(14_000, 0, 140_000_000);
        assert_eq!(fees.tip_lamports, 40_000);
        assert_eq!(fees.compute_unit_price, s.base_cu_price * 2);
        // 5_000 + 20_000 * 400_000 / 1e6 + 40_000
        assert_eq!(fees.total_sol_cost, 53_000);
    }

    #[test]
    fn combined_cost_is_capped_at_profit_share() {
        let s = FeeStrategy::default();
        // 0.0014 USDC net -> 10_000 lamports of profit. Uncapped, the bid
        // would be 4_000 tip + 4_000 priority + 5_000 base = 13_000, well
        // past the 8_000 budget.
        let fees = s.compute(1_400, 0, 140_000_000);
        assert_eq!(fees.tip_lamports, 2_461);
        assert_eq!(fees.compute_unit_price, 6_153);
        assert_eq!(fees.total_sol_cost, 9_922);
        assert!(fees.total_sol_cost < 13_000);
    }

    #[test]
    fn scaled_fees_respect_floors() {
        let s = FeeStrategy::default();
        // Tiny profit: scaling would push both components below their
        // floors, which win out.
        let fees = s.compute(30, 0, 140_000_000);
        assert_eq!(fees.tip_lamports, s.min_tip_lamports);
        assert_eq!(fees.compute_unit_price, s.min_cu_price);
    }
}
