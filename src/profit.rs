//! Integer-exact profit accounting.
//!
//! All arithmetic mirrors the on-chain flash-loan program: the fee uses
//! ceiling division, everything else is plain integer math with u128
//! intermediates so `borrow * fee_bps` cannot overflow.

use solana_sdk::pubkey::Pubkey;

use crate::tokens;

/// Base transaction fee per signature, in lamports.
pub const BASE_FEE_LAMPORTS: u64 = 5_000;

/// Conservative static SOL price used when no leg bridges SOL and the
/// borrow token: 140 USDC per SOL, in borrow-token smallest units.
pub const STATIC_SOL_PRICE_IN_BORROW: u64 = 140_000_000;

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const BPS_DENOM: u128 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct GasParams {
    pub priority_fee_micro: u64,
    pub cu_limit: u32,
    pub tip_lamports: u64,
    pub use_tip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitBreakdown {
    pub flash_fee: u64,
    pub gas_lamports: u64,
    pub gas_in_token: u64,
    pub expected_profit: i128,
    pub profit_bps: i32,
}

#[inline]
pub fn ceil_div(num: u128, den: u128) -> u128 {
    (num + den - 1) / den
}

/// Flash-loan fee, ceiling division. Must match the on-chain program
/// exactly; a divergence of one unit makes the repay revert.
pub fn flash_loan_fee(borrow: u64, fee_bps: u16) -> u64 {
    ceil_div(borrow as u128 * fee_bps as u128, BPS_DENOM) as u64
}

/// Total SOL cost of landing the transaction, in lamports.
pub fn gas_lamports(gas: &GasParams) -> u64 {
    let priority = ceil_div(gas.cu_limit as u128 * gas.priority_fee_micro as u128, 1_000_000);
    let tip = if gas.use_tip { gas.tip_lamports } else { 0 };
    BASE_FEE_LAMPORTS + priority as u64 + tip
}

/// Convert a lamport cost into borrow-token units using the leg-1 exchange
/// rate when one side of the cycle is SOL, or the static price otherwise.
pub fn gas_in_borrow_token(
    lamports: u64,
    borrow: u64,
    leg1_out: u64,
    token_a: &Pubkey,
    token_b: &Pubkey,
) -> u64 {
    let wsol = tokens::wsol();
    if *token_a == wsol {
        // Borrowing SOL itself: the cost is already in borrow units.
        lamports
    } else if *token_b == wsol && leg1_out > 0 {
        // Leg 1 is borrow -> SOL, so borrow/leg1_out is the SOL price.
        (lamports as u128 * borrow as u128 / leg1_out as u128) as u64
    } else {
        (lamports as u128 * STATIC_SOL_PRICE_IN_BORROW as u128 / LAMPORTS_PER_SOL as u128) as u64
    }
}

/// Expected profit of a cycle that borrows `borrow`, passes through
/// `leg1_out` of the intermediate token, and ends with `leg_final_out`
/// of the borrow token.
pub fn compute_profit(
    borrow: u64,
    leg1_out: u64,
    leg_final_out: u64,
    fee_bps: u16,
    gas: &GasParams,
    token_a: &Pubkey,
    token_b: &Pubkey,
) -> ProfitBreakdown {
    let flash_fee = flash_loan_fee(borrow, fee_bps);
    let lamports = gas_lamports(gas);
    let gas_in_token = gas_in_borrow_token(lamports, borrow, leg1_out, token_a, token_b);

    let expected_profit =
        leg_final_out as i128 - borrow as i128 - flash_fee as i128 - gas_in_token as i128;

    // i128 division truncates toward zero, matching the on-chain convention.
    let profit_bps = if borrow > 0 {
        (expected_profit * BPS_DENOM as i128 / borrow as i128) as i32
    } else {
        0
    };

    ProfitBreakdown {
        flash_fee,
        gas_lamports: lamports,
        gas_in_token,
        expected_profit,
        profit_bps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fee_exact_multiple() {
        // 1_000_000_000 * 9 / 10_000 divides exactly
        assert_eq!(flash_loan_fee(1_000_000_000, 9), 900_000);
    }

    #[test]
    fn fee_rounds_up() {
        assert_eq!(flash_loan_fee(1_000_000_001, 9), 900_001);
    }

    #[test]
    fn rejected_opportunity_scenario() {
        // borrow 1000 USDC, leg2 returns 1000.5 USDC, SOL is token_b
        let gas = GasParams {
            priority_fee_micro: 25_000,
            cu_limit: 400_000,
            tip_lamports: 0,
            use_tip: false,
        };
        let b = compute_profit(
            1_000_000_000,
            5_000_000,
            1_000_500_000,
            9,
            &gas,
            &tokens::usdc(),
            &tokens::wsol(),
        );
        assert_eq!(b.flash_fee, 900_000);
        assert_eq!(b.gas_lamports, 15_000);
        assert_eq!(b.gas_in_token, 3_000_000);
        assert_eq!(b.expected_profit, -3_400_000);
        assert_eq!(b.profit_bps, -34);
    }

    #[test]
    fn gas_when_borrowing_sol_is_identity() {
        let other = Pubkey::new_unique();
        assert_eq!(gas_in_borrow_token(15_000, 1, 1, &tokens::wsol(), &other), 15_000);
    }

    #[test]
    fn gas_static_price_path() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        // 1 SOL of gas at $140 = 140 USDC
        assert_eq!(
            gas_in_borrow_token(LAMPORTS_PER_SOL, 1, 1, &a, &b),
            STATIC_SOL_PRICE_IN_BORROW
        );
    }

    proptest! {
        #[test]
        fn fee_is_minimal_ceiling(borrow in 1u64..u64::MAX / 10_000, fee_bps in 0u16..=10_000) {
            let fee = flash_loan_fee(borrow, fee_bps) as u128;
            let product = borrow as u128 * fee_bps as u128;
            prop_assert!(fee * 10_000 >= product);
            if fee > 0 {
                prop_assert!((fee - 1) * 10_000 < product);
            }
        }

        #[test]
        fn profit_identity_holds(
            borrow in 1u64..1_000_000_000_000u64,
            leg1_out in 1u64..1_000_000_000_000u64,
            leg2_out in 0u64..1_000_000_000_000u64,
            fee_bps in 0u16..=10_000,
            priority in 0u64..1_000_000u64,
            cu_limit in 1u32..2_000_000u32,
        ) {
            let gas = GasParams {
                priority_fee_micro: priority,
                cu_limit,
                tip_lamports: 0,
                use_tip: false,
            };
            let a = Pubkey::new_unique();
            let b = Pubkey::new_unique();
            let out = compute_profit(borrow, leg1_out, leg2_out, fee_bps, &gas, &a, &b);
            let expected = leg2_out as i128
                - borrow as i128
                - out.flash_fee as i128
                - out.gas_in_token as i128;
            prop_assert_eq!(out.expected_profit, expected);
            prop_assert_eq!(
                out.profit_bps as i128,
                expected * 10_000 / borrow as i128
            );
        }
    }
}
