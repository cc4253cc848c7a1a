//! Atomic transaction composer.
//!
//! Consumes an opportunity's cached quotes verbatim, re-acquires only the
//! per-leg swap-instruction bundles, and compiles a signed V0 transaction
//! together with the block reference used at build time, so the caller
//! confirms against the same reference.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::v0::Message as MessageV0;
use solana_sdk::message::VersionedMessage;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BotError, Result};
use crate::flash_loan::FlashLoanClient;
use crate::gateway::quote::{Quote, SwapInstructionBundle};
use crate::gateway::ProviderGateway;
use crate::scanner::{TriangularOpportunity, TwoLegOpportunity};
use crate::tokens;

/// Hard chain-level limit on the encoded transaction.
pub const MAX_TX_BYTES: usize = 1232;

pub const TWO_LEG_FRESHNESS_MS: u64 = 10_000;
pub const TRIANGULAR_FRESHNESS_MS: u64 = 30_000;

/// Three swaps need more compute than the two-leg default.
pub const TRIANGULAR_MIN_CU_LIMIT: u32 = 600_000;

#[derive(Debug, Clone)]
pub struct ComposeParams {
    pub cu_limit: u32,
    pub cu_price: u64,
    pub slippage_bps: u16,
    pub tip_instruction: Option<Instruction>,
}

#[derive(Debug)]
pub struct ComposedTransaction {
    pub tx: VersionedTransaction,
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

pub struct TransactionComposer {
    rpc: Arc<RpcClient>,
    gateway: Arc<ProviderGateway>,
    flash_loan: Arc<FlashLoanClient>,
    signer: Arc<Keypair>,
    borrow_token_account: Pubkey,
}

impl TransactionComposer {
    pub fn new(
        rpc: Arc<RpcClient>,
        gateway: Arc<ProviderGateway>,
        flash_loan: Arc<FlashLoanClient>,
        signer: Arc<Keypair>,
        borrow_token_account: Pubkey,
    ) -> Self {
        Self {
            rpc,
            gateway,
            flash_loan,
            signer,
            borrow_token_account,
        }
    }

    pub async fn compose_two_leg(
        &self,
        opp: &TwoLegOpportunity,
        params: &ComposeParams,
    ) -> Result<ComposedTransaction> {
        check_freshness(opp.age_ms(), TWO_LEG_FRESHNESS_MS)?;

        // Quotes from the lite source cannot be posted back for swap
        // instructions; re-quote those legs through the aggregator, chaining
        // amounts, and re-guard profitability when anything moved.
        let q1 = self
            .ensure_aggregator_quote(&opp.quote_leg1, opp.borrow_amount, params.slippage_bps, false)
            .await?;
        let q2 = self
            .ensure_aggregator_quote(&opp.quote_leg2, q1.out_amount, params.slippage_bps, false)
            .await?;
        if q2.out_amount <= opp.borrow_amount + opp.flash_fee {
            info!(
                "{}: no longer profitable at execution ({} <= {})",
                opp.pair,
                q2.out_amount,
                opp.borrow_amount + opp.flash_fee
            );
            return Err(BotError::NoRoute);
        }

        let wrap_native = !involves_wsol(&[opp.token_a, opp.token_b]);
        let user = self.signer.pubkey();
        let (leg1, leg2) = tokio::try_join!(
            self.gateway.swap_instructions(&q1, &user, wrap_native, false),
            self.gateway.swap_instructions(&q2, &user, wrap_native, true),
        )?;

        self.compile(opp.borrow_amount, &[leg1, leg2], params.cu_limit, params)
            .await
    }

    pub async fn compose_triangular(
        &self,
        opp: &TriangularOpportunity,
        params: &ComposeParams,
    ) -> Result<ComposedTransaction> {
        check_freshness(opp.age_ms(), TRIANGULAR_FRESHNESS_MS)?;

        let route = &opp.route;
        let q1 = self
            .ensure_aggregator_quote(&opp.quote_leg1, route.borrow_amount, params.slippage_bps, true)
            .await?;
        let q2 = self
            .ensure_aggregator_quote(&opp.quote_leg2, q1.out_amount, params.slippage_bps, true)
            .await?;
        let q3 = self
            .ensure_aggregator_quote(&opp.quote_leg3, q2.out_amount, params.slippage_bps, true)
            .await?;
        if q3.out_amount <= route.borrow_amount + opp.flash_fee {
            info!(
                "triangle {}: no longer profitable at execution ({} <= {})",
                route.name,
                q3.out_amount,
                route.borrow_amount + opp.flash_fee
            );
            return Err(BotError::NoRoute);
        }

        let wrap_native = !involves_wsol(&[route.token_a, route.token_b, route.token_c]);
        let user = self.signer.pubkey();
        let (leg1, leg2, leg3) = tokio::try_join!(
            self.gateway.swap_instructions(&q1, &user, wrap_native, false),
            self.gateway.swap_instructions(&q2, &user, wrap_native, true),
            self.gateway.swap_instructions(&q3, &user, wrap_native, true),
        )?;

        let cu_limit = params.cu_limit.max(TRIANGULAR_MIN_CU_LIMIT);
        self.compile(route.borrow_amount, &[leg1, leg2, leg3], cu_limit, params)
            .await
    }

    async fn ensure_aggregator_quote(
        &self,
        quote: &Quote,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<Quote> {
        if quote.supports_swap_instructions() && quote.in_amount == amount {
            return Ok(quote.clone());
        }
        debug!(
            "re-quoting {} -> {} ({} units) through the aggregator",
            tokens::label_for_mint(&quote.input_mint),
            tokens::label_for_mint(&quote.output_mint),
            amount,
        );
        self.gateway
            .aggregator_quote(
                &quote.input_mint,
                &quote.output_mint,
                amount,
                slippage_bps,
                direct_only,
            )
            .await
    }

    async fn compile(
        &self,
        borrow_amount: u64,
        legs: &[SwapInstructionBundle],
        cu_limit: u32,
        params: &ComposeParams,
    ) -> Result<ComposedTransaction> {
        let payer = self.signer.pubkey();
        let borrow_ix =
            self.flash_loan
                .build_borrow_ix(&payer, &self.borrow_token_account, borrow_amount);
        let repay_ix = self
            .flash_loan
            .build_repay_ix(&payer, &self.borrow_token_account);

        let instructions = assemble_sequence(
            cu_limit,
            params.cu_price,
            borrow_ix,
            legs,
            repay_ix,
            params.tip_instruction.clone(),
        );

        let alt_addresses: Vec<Pubkey> = legs
            .iter()
            .flat_map(|l| l.lookup_tables.iter().copied())
            .collect();
        let lookup_tables = self.gateway.load_lookup_tables(&alt_addresses).await?;

        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await?;

        let message = MessageV0::try_compile(&payer, &instructions, &lookup_tables, blockhash)
            .map_err(|e| BotError::ChainError {
                err: format!("message compile: {e}"),
            })?;
        let tx =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.signer.as_ref()])
                .map_err(|e| BotError::ChainError {
                    err: format!("signing: {e}"),
                })?;

        let bytes = bincode::serialize(&tx)
            .map_err(|e| BotError::ChainError {
                err: format!("serialize: {e}"),
            })?
            .len();
        debug!(
            "tx assembled: {} instructions, {} lookup tables, {bytes} bytes ({:.0}% of max)",
            instructions.len(),
            lookup_tables.len(),
            bytes as f64 / MAX_TX_BYTES as f64 * 100.0,
        );
        if bytes > MAX_TX_BYTES {
            return Err(BotError::TransactionTooLarge {
                bytes,
                max: MAX_TX_BYTES,
            });
        }

        Ok(ComposedTransaction {
            tx,
            blockhash,
            last_valid_block_height,
        })
    }
}

fn check_freshness(age_ms: u64, max_ms: u64) -> Result<()> {
    if age_ms > max_ms {
        return Err(BotError::QuotesStale { age_ms, max_ms });
    }
    Ok(())
}

fn involves_wsol(mints: &[Pubkey]) -> bool {
    let wsol = tokens::wsol();
    mints.iter().any(|m| *m == wsol)
}

/// The atomic instruction sequence:
///
/// ```text
/// set_compute_unit_limit
/// set_compute_unit_price
/// flash_borrow
/// leg1.setup*  leg1.swap  leg1.cleanup?
/// legN.token_ledger  legN.setup*  legN.swap  legN.cleanup?   (N >= 2)
/// flash_repay
/// tip_transfer?
/// ```
///
/// Legs after the first run on the token ledger so each consumes the amount
/// actually received, not the quoted amount.
fn assemble_sequence(
    cu_limit: u32,
    cu_price: u64,
    borrow_ix: Instruction,
    legs: &[SwapInstructionBundle],
    repay_ix: Instruction,
    tip_instruction: Option<Instruction>,
) -> Vec<Instruction> {
    let mut instructions = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(cu_limit),
        ComputeBudgetInstruction::set_compute_unit_price(cu_price),
        borrow_ix,
    ];
    for (i, leg) in legs.iter().enumerate() {
        if i > 0 {
            if let Some(ledger) = &leg.token_ledger {
                instructions.push(ledger.clone());
            }
        }
        instructions.extend(leg.setup.iter().cloned());
        instructions.push(leg.swap.clone());
        if let Some(cleanup) = &leg.cleanup {
            instructions.push(cleanup.clone());
        }
    }
    instructions.push(repay_ix);
    if let Some(tip) = tip_instruction {
        instructions.push(tip);
    }
    instructions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_loan;
    use crate::gateway::GatewayConfig;
    use crate::scanner::now_ms;
    use serde_json::json;
    use solana_sdk::instruction::AccountMeta;
    use solana_sdk::system_program;

    fn composer() -> TransactionComposer {
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let gateway = Arc::new(ProviderGateway::new(Arc::clone(&rpc), GatewayConfig::default()).unwrap());
        let flash = Arc::new(
            FlashLoanClient::new(
                Arc::clone(&rpc),
                flash_loan::DEFAULT_PROGRAM_ID,
                tokens::USDC_MINT,
            )
            .unwrap(),
        );
        TransactionComposer::new(
            rpc,
            gateway,
            flash,
            Arc::new(Keypair::new()),
            Pubkey::new_unique(),
        )
    }

    fn quote(input: Pubkey, output: Pubkey, in_amount: u64, out_amount: u64) -> Quote {
        Quote::from_jupiter(
            json!({
                "inputMint": input.to_string(),
                "outputMint": output.to_string(),
                "inAmount": in_amount.to_string(),
                "outAmount": out_amount.to_string(),
            }),
            &input,
            &output,
            50,
        )
        .unwrap()
    }

    fn stale_opportunity(age_ms: u64) -> TwoLegOpportunity {
        let usdc = tokens::usdc();
        let target = Pubkey::new_unique();
        TwoLegOpportunity {
            pair: "TEST/USDC".to_string(),
            token_a: usdc,
            token_b: target,
            borrow_amount: 1_000_000_000,
            leg1_out: 5_000_000,
            leg2_out: 1_010_000_000,
            flash_fee: 900_000,
            sol_costs_in_token: 3_000_000,
            expected_profit: 6_100_000,
            profit_bps: 61,
            price_impact_leg1: 0.0,
            price_impact_leg2: 0.0,
            timestamp_ms: now_ms() - age_ms,
            quote_leg1: quote(usdc, target, 1_000_000_000, 5_000_000),
            quote_leg2: quote(target, usdc, 5_000_000, 1_010_000_000),
        }
    }

    #[tokio::test]
    async fn stale_two_leg_is_rejected_before_any_io() {
        let c = composer();
        let opp = stale_opportunity(11_000);
        let params = ComposeParams {
            cu_limit: 400_000,
            cu_price: 25_000,
            slippage_bps: 50,
            tip_instruction: None,
        };
        match c.compose_two_leg(&opp, &params).await {
            Err(BotError::QuotesStale { age_ms, max_ms }) => {
                assert!(age_ms >= 11_000);
                assert_eq!(max_ms, TWO_LEG_FRESHNESS_MS);
            }
            other => panic!("expected QuotesStale, got {other:?}"),
        }
    }

    fn marker_ix(tag: u8) -> Instruction {
        Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![],
            data: vec![tag],
        }
    }

    const LEDGER_TAG: u8 = 0xD0;
    const SETUP_TAG: u8 = 0xA0;
    const SWAP_TAG: u8 = 0xB0;
    const CLEANUP_TAG: u8 = 0xC0;

    fn bundle(with_ledger: bool, setups: usize, with_cleanup: bool) -> SwapInstructionBundle {
        SwapInstructionBundle {
            token_ledger: with_ledger.then(|| marker_ix(LEDGER_TAG)),
            setup: (0..setups).map(|_| marker_ix(SETUP_TAG)).collect(),
            swap: marker_ix(SWAP_TAG),
            cleanup: with_cleanup.then(|| marker_ix(CLEANUP_TAG)),
            lookup_tables: vec![],
        }
    }

    const fn tag(data: &[u8]) -> u8 {
        data[0]
    }

    #[test]
    fn two_leg_sequence_order() {
        let program = Pubkey::new_unique();
        let borrower = Pubkey::new_unique();
        let receipt = Pubkey::new_unique();
        let borrow_ix = Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new(receipt, false)],
            data: vec![1],
        };
        let repay_ix = Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new(receipt, false)],
            data: vec![2],
        };
        let tip = solana_sdk::system_instruction::transfer(&borrower, &Pubkey::new_unique(), 1_000);

        let legs = [bundle(true, 2, true), bundle(true, 1, false)];
        let seq = assemble_sequence(400_000, 25_000, borrow_ix.clone(), &legs, repay_ix.clone(), Some(tip));

        // compute budget first
        assert_eq!(seq[0].program_id, solana_sdk::compute_budget::id());
        assert_eq!(seq[1].program_id, solana_sdk::compute_budget::id());
        // borrow before any swap leg
        assert_eq!(seq[2].data, vec![1]);
        // leg 1: setup, setup, swap, cleanup (its token ledger is skipped)
        assert_eq!(tag(&seq[3].data), SETUP_TAG);
        assert_eq!(tag(&seq[4].data), SETUP_TAG);
        assert_eq!(tag(&seq[5].data), SWAP_TAG);
        assert_eq!(tag(&seq[6].data), CLEANUP_TAG);
        // leg 2: token ledger first, then setup, swap
        assert_eq!(tag(&seq[7].data), LEDGER_TAG);
        assert_eq!(tag(&seq[8].data), SETUP_TAG);
        assert_eq!(tag(&seq[9].data), SWAP_TAG);
        // repay, then the tip closes the transaction
        assert_eq!(seq[10].data, vec![2]);
        assert_eq!(seq[11].program_id, system_program::id());
        assert_eq!(seq.len(), 12);

        // atomicity: exactly one borrow and one repay against the same
        // program and receipt, borrow first
        let borrow_pos = seq.iter().position(|ix| ix.data == vec![1]).unwrap();
        let repay_pos = seq.iter().position(|ix| ix.data == vec![2]).unwrap();
        assert!(borrow_pos < repay_pos);
        assert_eq!(seq[borrow_pos].program_id, seq[repay_pos].program_id);
        assert_eq!(
            seq[borrow_pos].accounts[0].pubkey,
            seq[repay_pos].accounts[0].pubkey
        );
    }

    #[test]
    fn wsol_legs_disable_native_wrap() {
        assert!(!involves_wsol(&[Pubkey::new_unique(), Pubkey::new_unique()]));
        assert!(involves_wsol(&[tokens::usdc(), tokens::wsol()]));
    }
}
