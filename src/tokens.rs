//! Token mint addresses, decimals, and pair utilities.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{BotError, Result};

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// (symbol, mint, decimals)
pub const WELL_KNOWN_MINTS: &[(&str, &str, u8)] = &[
    // Majors
    ("SOL", WSOL_MINT, 9),
    ("USDC", USDC_MINT, 6),
    ("USDT", USDT_MINT, 6),
    // DeFi blue chips
    ("JUP", "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", 6),
    ("RAY", "4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R", 6),
    ("ORCA", "orcaEKTdK7LKz57vaAYr9QeNsVEPfiu6QeMU1kektZE", 6),
    ("PYTH", "HZ1JovNiVvGrGNiiYvEozEVgZ58xaU3RKwX8eACQBCt3", 6),
    ("RENDER", "rndrizKT3MK1iimdxRdWabcF7Zg7AR5T4nud4EkHBof", 8),
    ("HNT", "hntyVP6YFm1Hg25TN9WGLqM12b8TQmcknKrdu1oxWux", 8),
    ("W", "85VBFQZC9TZkfaptBWjvUw7YbZjy52A6mjtPGjstQAmQ", 6),
    ("TNSR", "TNSRxcUxoT9xBG3de7PiJyTDYu7kskLqcpddxnEJAS6", 9),
    ("JTO", "jtojtomepa8beP8AuQc6eXt5FriJwfFMwQx2v2f9mCL", 9),
    // Liquid staking tokens
    ("MSOL", "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So", 9),
    ("JITOSOL", "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn", 9),
    ("BSOL", "bSo13r4TkiE4KumL71LsHTPpL2euBYLFx6h9HP3piy1", 9),
    ("INF", "5oVNBeEEQvYi1cX3ir8Dx5n1P7pdxydbGF2X4TxVusJm", 9),
    // Meme / high volume
    ("BONK", "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", 5),
    ("WIF", "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm", 6),
    ("POPCAT", "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr", 9),
    ("MEW", "MEW1gQWJ3nEXg2qgERiKu7FAFj79PHvQVREQUzScPP5", 5),
    ("TRUMP", "6p6xgHyF7AeE6TZkSmFsko444wqoP15icUSqi2jfGiPN", 6),
    ("FARTCOIN", "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump", 6),
    ("BOME", "ukHH6c7mMyiWCf1b9pnWe25TSpkDDt3H5pQZgZ74J82", 6),
    ("WEN", "WENWENvqqNya429ubCdR81ZmD69brwQaaBYY6p3LCpk", 5),
    // Mid liquidity
    ("KMNO", "KMNo3nJsBXfcpJTVhZcXLW7RmTwTt4GVFE7suUBo9sS", 6),
    ("DRIFT", "DriFtupJYLTosbwoN8koMbEYSx54aFAVLddWsbksjwg7", 6),
    // Low liquidity
    ("SAMO", "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU", 9),
    ("MNDE", "MNDEFzGvMt87ueuHvVU9VcTqsAP5b3fTGPsHuuPA5ey", 9),
    ("STEP", "StepAscQoEioFxxWGnh2sLBDFp9d8rvKz2Yp39iDpyT", 9),
    ("SHDW", "SHDWyBxihqiCj6YekG2GUr7wqKLeLAMK1gHZck9pL6y", 9),
    ("DUST", "DUSTawucrTsGU8hcqRdHDCbuYhCPADMLM2VcCb8VnFnQ", 9),
    ("BLZE", "BLZEEuZUBVqFhj8adcCFPJvPVCiCyVmh3hkJMrU8KuJA", 9),
    ("ZEUS", "ZEUS1aR7aX8DFFJf5QjWj2ftDDdNTroMNGo8YoQm3Gq", 6),
    ("AI16Z", "HeLp6NuQkmYB4pYWo2zYs22mESHXPQYzXbB8n4V98jwC", 9),
];

/// Per-target borrow overrides, keyed by the first 8 chars of the target
/// mint. Value is the borrow amount in USDC smallest units; 0 means "use the
/// configured default". Sized roughly by on-chain liquidity depth.
const PAIR_BORROW_OVERRIDES: &[(&str, u64)] = &[
    // Deep liquidity: full default borrow
    ("So111111", 0),
    ("Es9vMFrz", 0),
    // High liquidity: $100
    ("JUPyiwrY", 100_000_000),
    ("4k3Dyjzv", 100_000_000),
    ("orcaEKTd", 100_000_000),
    ("mSoLzYCx", 100_000_000),
    ("J1toso1u", 100_000_000),
    ("jtojtome", 100_000_000),
    ("rndrizKT", 100_000_000),
    ("85VBFQZC", 100_000_000),
    // Moderate liquidity: $50
    ("EKpQGSJt", 50_000_000),
    ("HZ1JovNi", 50_000_000),
    ("hntyVP6Y", 50_000_000),
    ("TNSRxcUx", 50_000_000),
    ("bSo13r4T", 50_000_000),
    ("5oVNBeEE", 50_000_000),
    ("KMNo3nJs", 50_000_000),
    ("DriFtupJ", 50_000_000),
    // Meme / volatile: $20
    ("DezXAZ8z", 20_000_000),
    ("7GCihgDB", 20_000_000),
    ("MEW1gQWJ", 20_000_000),
    ("6p6xgHyF", 20_000_000),
    ("9BB6NFEc", 20_000_000),
    ("ukHH6c7m", 20_000_000),
    ("WENWENvq", 20_000_000),
    // Low liquidity: $10
    ("7xKXtg2C", 10_000_000),
    ("MNDEFzGv", 10_000_000),
    ("StepAscQ", 10_000_000),
    ("SHDWyBxi", 10_000_000),
    ("DUSTawuc", 10_000_000),
    ("BLZEEuZU", 10_000_000),
    ("ZEUS1aR7", 10_000_000),
    ("HeLp6NuQ", 10_000_000),
];

pub fn wsol() -> Pubkey {
    Pubkey::from_str(WSOL_MINT).expect("static mint")
}

pub fn usdc() -> Pubkey {
    Pubkey::from_str(USDC_MINT).expect("static mint")
}

/// Resolve a symbol or base58 mint string into a mint address.
pub fn resolve_mint(symbol_or_mint: &str) -> Result<Pubkey> {
    let upper = symbol_or_mint.to_uppercase();
    if let Some((_, mint, _)) = WELL_KNOWN_MINTS.iter().find(|(sym, _, _)| *sym == upper) {
        return Ok(Pubkey::from_str(mint).expect("static mint"));
    }
    Pubkey::from_str(symbol_or_mint)
        .map_err(|_| BotError::config(format!("unknown token or invalid mint: {symbol_or_mint}")))
}

pub fn symbol_for_mint(mint: &Pubkey) -> Option<&'static str> {
    let s = mint.to_string();
    WELL_KNOWN_MINTS
        .iter()
        .find(|(_, m, _)| *m == s)
        .map(|(sym, _, _)| *sym)
}

/// Decimal count for a mint; unknown mints default to 6.
pub fn decimals_for_mint(mint: &Pubkey) -> u8 {
    let s = mint.to_string();
    WELL_KNOWN_MINTS
        .iter()
        .find(|(_, m, _)| *m == s)
        .map(|(_, _, d)| *d)
        .unwrap_or(6)
}

/// Short printable label: the symbol when known, otherwise a mint prefix.
pub fn label_for_mint(mint: &Pubkey) -> String {
    match symbol_for_mint(mint) {
        Some(sym) => sym.to_string(),
        None => {
            let s = mint.to_string();
            format!("{}..", &s[..6])
        }
    }
}

/// Parse `"TARGET/QUOTE"` into `(target_mint, quote_mint)`.
pub fn parse_pair(pair: &str) -> Result<(Pubkey, Pubkey)> {
    let mut parts = pair.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(target), Some(quote), None) if !target.is_empty() && !quote.is_empty() => {
            Ok((resolve_mint(target)?, resolve_mint(quote)?))
        }
        _ => Err(BotError::config(format!(
            "invalid pair format: {pair} (expected TARGET/QUOTE)"
        ))),
    }
}

/// Per-pair borrow sizing. Returns the override for the target mint, or
/// `default` when the pair has none.
pub fn borrow_for_target(target: &Pubkey, default: u64) -> u64 {
    let s = target.to_string();
    let prefix = &s[..8.min(s.len())];
    match PAIR_BORROW_OVERRIDES.iter().find(|(p, _)| *p == prefix) {
        Some((_, 0)) | None => default,
        Some((_, amount)) => *amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pair_resolves_symbols() {
        let (target, quote) = parse_pair("SOL/USDC").unwrap();
        assert_eq!(target.to_string(), WSOL_MINT);
        assert_eq!(quote.to_string(), USDC_MINT);
    }

    #[test]
    fn parse_pair_accepts_raw_mints() {
        let (target, _) = parse_pair(&format!("{}/USDC", WSOL_MINT)).unwrap();
        assert_eq!(target.to_string(), WSOL_MINT);
    }

    #[test]
    fn parse_pair_rejects_garbage() {
        assert!(parse_pair("SOLUSDC").is_err());
        assert!(parse_pair("SOL/USDC/EXTRA").is_err());
        assert!(parse_pair("/USDC").is_err());
    }

    #[test]
    fn unknown_mint_decimals_default_to_six() {
        let mint = Pubkey::new_unique();
        assert_eq!(decimals_for_mint(&mint), 6);
    }

    #[test]
    fn borrow_override_by_prefix() {
        let bonk = resolve_mint("BONK").unwrap();
        assert_eq!(borrow_for_target(&bonk, 200_000_000), 20_000_000);
        // Deep-liquidity targets fall through to the default
        let sol = resolve_mint("SOL").unwrap();
        assert_eq!(borrow_for_target(&sol, 200_000_000), 200_000_000);
        // Unknown targets too
        assert_eq!(borrow_for_target(&Pubkey::new_unique(), 200_000_000), 200_000_000);
    }
}
