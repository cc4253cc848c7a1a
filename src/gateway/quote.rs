//! Quote and swap-instruction wire types.
//!
//! The typed view is extracted for pricing; the verbatim aggregator response
//! is kept alongside so the swap-instructions request can return it to the
//! API byte-for-byte unmodified.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    Jupiter,
    Raydium,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jupiter => "jupiter",
            Self::Raydium => "raydium",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteLeg {
    pub label: Option<String>,
    pub percent: u8,
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    pub slippage_bps: u16,
    pub price_impact_pct: f64,
    pub route_plan: Vec<RouteLeg>,
    pub source: QuoteSource,
    /// Verbatim provider response. Never mutated.
    pub raw: Value,
}

fn amount_field(value: &Value, key: &str) -> Result<u64> {
    let field = value.get(key).ok_or(BotError::NoRoute)?;
    match field {
        Value::String(s) => s.parse::<u64>().map_err(|_| BotError::NoRoute),
        Value::Number(n) => n.as_u64().ok_or(BotError::NoRoute),
        _ => Err(BotError::NoRoute),
    }
}

fn mint_field(value: &Value, key: &str, fallback: &Pubkey) -> Pubkey {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Pubkey::from_str(s).ok())
        .unwrap_or(*fallback)
}

fn impact_field(value: &Value) -> f64 {
    match value.get("priceImpactPct") {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn route_plan(value: &Value) -> Vec<RouteLeg> {
    value
        .get("routePlan")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .map(|step| RouteLeg {
                    label: step
                        .pointer("/swapInfo/label")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    percent: step.get("percent").and_then(Value::as_u64).unwrap_or(100) as u8,
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Quote {
    /// Build from a Jupiter `/quote` response body.
    pub fn from_jupiter(
        raw: Value,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        slippage_bps: u16,
    ) -> Result<Self> {
        let out_amount = amount_field(&raw, "outAmount")?;
        if out_amount == 0 {
            return Err(BotError::NoRoute);
        }
        Ok(Self {
            input_mint: mint_field(&raw, "inputMint", input_mint),
            output_mint: mint_field(&raw, "outputMint", output_mint),
            in_amount: amount_field(&raw, "inAmount")?,
            out_amount,
            slippage_bps,
            price_impact_pct: impact_field(&raw),
            route_plan: route_plan(&raw),
            source: QuoteSource::Jupiter,
            raw,
        })
    }

    /// Build from a Raydium `compute/swap-base-in` response body. The
    /// payload of interest sits under `data`.
    pub fn from_raydium(
        raw: Value,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        slippage_bps: u16,
    ) -> Result<Self> {
        let ok = raw.get("success").and_then(Value::as_bool).unwrap_or(false);
        let data = raw.get("data");
        let data = match (ok, data) {
            (true, Some(d)) => d.clone(),
            _ => return Err(BotError::NoRoute),
        };
        let out_amount = amount_field(&data, "outputAmount")?;
        if out_amount == 0 {
            return Err(BotError::NoRoute);
        }
        Ok(Self {
            input_mint: mint_field(&data, "inputMint", input_mint),
            output_mint: mint_field(&data, "outputMint", output_mint),
            in_amount: amount_field(&data, "inputAmount")?,
            out_amount,
            slippage_bps,
            price_impact_pct: impact_field(&data),
            route_plan: route_plan(&data),
            source: QuoteSource::Raydium,
            raw,
        })
    }

    /// Quotes from the lite source cannot be posted back to the aggregator
    /// for swap instructions.
    pub fn supports_swap_instructions(&self) -> bool {
        self.source == QuoteSource::Jupiter
    }
}

// ── Swap-instruction wire schema ──

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAccountMeta {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInstruction {
    pub program_id: String,
    pub accounts: Vec<WireAccountMeta>,
    /// Base64-encoded instruction data.
    pub data: String,
}

impl WireInstruction {
    pub fn decode(&self) -> Result<Instruction> {
        let program_id = Pubkey::from_str(&self.program_id).map_err(|_| decode_err("programId"))?;
        let data = BASE64.decode(&self.data).map_err(|_| decode_err("data"))?;
        let accounts = self
            .accounts
            .iter()
            .map(|a| {
                let pubkey = Pubkey::from_str(&a.pubkey).map_err(|_| decode_err("account"))?;
                Ok(AccountMeta {
                    pubkey,
                    is_signer: a.is_signer,
                    is_writable: a.is_writable,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }
}

fn decode_err(what: &str) -> BotError {
    BotError::ProviderRequest {
        status: 200,
        body: format!("malformed swap instruction field: {what}"),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInstructionsResponse {
    #[serde(default)]
    pub token_ledger_instruction: Option<WireInstruction>,
    #[serde(default)]
    pub setup_instructions: Vec<WireInstruction>,
    pub swap_instruction: WireInstruction,
    #[serde(default)]
    pub cleanup_instruction: Option<WireInstruction>,
    #[serde(default)]
    pub address_lookup_table_addresses: Vec<String>,
}

/// Decoded per-leg instruction bundle.
#[derive(Debug, Clone)]
pub struct SwapInstructionBundle {
    pub token_ledger: Option<Instruction>,
    pub setup: Vec<Instruction>,
    pub swap: Instruction,
    pub cleanup: Option<Instruction>,
    pub lookup_tables: Vec<Pubkey>,
}

impl SwapInstructionsResponse {
    pub fn decode(self) -> Result<SwapInstructionBundle> {
        Ok(SwapInstructionBundle {
            token_ledger: self
                .token_ledger_instruction
                .as_ref()
                .map(WireInstruction::decode)
                .transpose()?,
            setup: self
                .setup_instructions
                .iter()
                .map(WireInstruction::decode)
                .collect::<Result<Vec<_>>>()?,
            swap: self.swap_instruction.decode()?,
            cleanup: self
                .cleanup_instruction
                .as_ref()
                .map(WireInstruction::decode)
                .transpose()?,
            lookup_tables: self
                .address_lookup_table_addresses
                .iter()
                .filter_map(|s| Pubkey::from_str(s).ok())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn jupiter_quote_parses_and_keeps_raw() {
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let raw = json!({
            "inputMint": input.to_string(),
            "outputMint": output.to_string(),
            "inAmount": "200000000",
            "outAmount": "1005000000",
            "priceImpactPct": "0.0012",
            "routePlan": [{"swapInfo": {"label": "Whirlpool"}, "percent": 100}],
        });
        let q = Quote::from_jupiter(raw.clone(), &input, &output, 50).unwrap();
        assert_eq!(q.in_amount, 200_000_000);
        assert_eq!(q.out_amount, 1_005_000_000);
        assert_eq!(q.route_plan.len(), 1);
        assert_eq!(q.route_plan[0].label.as_deref(), Some("Whirlpool"));
        assert!((q.price_impact_pct - 0.0012).abs() < 1e-12);
        // raw survives untouched for the swap-instructions round trip
        assert_eq!(q.raw, raw);
    }

    #[test]
    fn zero_output_is_no_route() {
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let raw = json!({"inAmount": "1", "outAmount": "0"});
        assert!(matches!(
            Quote::from_jupiter(raw, &input, &output, 50),
            Err(BotError::NoRoute)
        ));
    }

    #[test]
    fn raydium_quote_unwraps_data_envelope() {
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let raw = json!({
            "success": true,
            "data": {
                "inputAmount": "50000000",
                "outputAmount": "251000",
                "priceImpactPct": 0.3,
            }
        });
        let q = Quote::from_raydium(raw, &input, &output, 100).unwrap();
        assert_eq!(q.source, QuoteSource::Raydium);
        assert_eq!(q.out_amount, 251_000);
        assert!(!q.supports_swap_instructions());
    }

    #[test]
    fn raydium_failure_envelope_is_no_route() {
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let raw = json!({"success": false, "msg": "no route"});
        assert!(matches!(
            Quote::from_raydium(raw, &input, &output, 100),
            Err(BotError::NoRoute)
        ));
    }

    #[test]
    fn wire_instruction_decodes() {
        let program = Pubkey::new_unique();
        let acct = Pubkey::new_unique();
        let wire = WireInstruction {
            program_id: program.to_string(),
            accounts: vec![WireAccountMeta {
                pubkey: acct.to_string(),
                is_signer: true,
                is_writable: false,
            }],
            data: BASE64.encode([1u8, 2, 3]),
        };
        let ix = wire.decode().unwrap();
        assert_eq!(ix.program_id, program);
        assert_eq!(ix.data, vec![1, 2, 3]);
        assert!(ix.accounts[0].is_signer);
        assert!(!ix.accounts[0].is_writable);
    }
}
