//! Websocket-driven discovery listeners.
//!
//! Both listeners are best-effort side channels: they swallow their own
//! errors into debug logs and post events to the orchestrator over an mpsc
//! channel. They never execute anything themselves.

pub mod backrun;
pub mod pool_discovery;

use solana_sdk::pubkey::Pubkey;
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

/// Venue programs whose logs both listeners watch.
pub const MONITORED_PROGRAMS: &[(&str, &str)] = &[
    ("raydium-v4", "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"),
    ("raydium-clmm", "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK"),
    ("orca-whirlpool", "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"),
    ("meteora-dlmm", "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo"),
    ("pump-amm", "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA"),
];

pub fn monitored_programs() -> Vec<(&'static str, Pubkey)> {
    MONITORED_PROGRAMS
        .iter()
        .filter_map(|(name, id)| Pubkey::from_str(id).ok().map(|pk| (*name, pk)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct NewPoolEvent {
    pub signature: Option<String>,
    pub mints: Vec<Pubkey>,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct BackrunSignal {
    pub signature: String,
    pub token_in: Pubkey,
    pub token_out: Pubkey,
    pub amount_in: u64,
    pub amount_out: u64,
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    NewPool(NewPoolEvent),
    Backrun(BackrunSignal),
}

/// Insertion-ordered signature set. Capped at `cap`; on overflow the oldest
/// entries are dropped until `retain` remain.
#[derive(Debug)]
pub struct SignatureDeduper {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
    retain: usize,
}

impl SignatureDeduper {
    pub fn new(cap: usize, retain: usize) -> Self {
        assert!(retain <= cap);
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap,
            retain,
        }
    }

    /// Returns true when the signature is new.
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }
        self.seen.insert(signature.to_string());
        self.order.push_back(signature.to_string());
        if self.order.len() > self.cap {
            while self.order.len() > self.retain {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SignatureDeduper {
    fn default() -> Self {
        Self::new(10_000, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_signatures_are_rejected() {
        let mut dedup = SignatureDeduper::default();
        assert!(dedup.insert("sig-1"));
        assert!(!dedup.insert("sig-1"));
        assert!(dedup.insert("sig-2"));
    }

    #[test]
    fn overflow_retains_most_recent() {
        let mut dedup = SignatureDeduper::new(10, 5);
        for i in 0..11 {
            assert!(dedup.insert(&format!("sig-{i}")));
        }
        assert_eq!(dedup.len(), 5);
        // the oldest were evicted and may be seen again
        assert!(dedup.insert("sig-0"));
        // the newest are still deduplicated
        assert!(!dedup.insert("sig-10"));
    }
}
