//! Process-lifetime counters, printed as a one-line summary every minute.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct BotMetrics {
    start: Instant,
    pub started_at: DateTime<Utc>,
    pub scan_cycles: AtomicU64,
    pub opportunities_found: AtomicU64,
    pub triangular_opportunities: AtomicU64,
    pub simulation_failures: AtomicU64,
    pub execution_failures: AtomicU64,
    pub successful_arbs: AtomicU64,
    pub jito_submissions: AtomicU64,
    pub new_pools_detected: AtomicU64,
    pub backrun_signals: AtomicU64,
    /// Expected profit of confirmed arbs, in borrow-token units. Signed so a
    /// mispriced confirm cannot wrap the counter.
    pub total_profit: AtomicI64,
    pub total_gas_spent: AtomicU64,
}

impl BotMetrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
            scan_cycles: AtomicU64::new(0),
            opportunities_found: AtomicU64::new(0),
            triangular_opportunities: AtomicU64::new(0),
            simulation_failures: AtomicU64::new(0),
            execution_failures: AtomicU64::new(0),
            successful_arbs: AtomicU64::new(0),
            jito_submissions: AtomicU64::new(0),
            new_pools_detected: AtomicU64::new(0),
            backrun_signals: AtomicU64::new(0),
            total_profit: AtomicI64::new(0),
            total_gas_spent: AtomicU64::new(0),
        }
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_profit(&self, profit: i64) {
        self.total_profit.fetch_add(profit, Ordering::Relaxed);
    }

    pub fn add_gas(&self, lamports: u64) {
        self.total_gas_spent.fetch_add(lamports, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        let uptime_min = self.start.elapsed().as_secs_f64() / 60.0;
        let cycles = self.scan_cycles.load(Ordering::Relaxed);
        let opps = self.opportunities_found.load(Ordering::Relaxed);
        let hit_rate = if cycles > 0 {
            format!("{:.1}%", opps as f64 / cycles as f64 * 100.0)
        } else {
            "0%".to_string()
        };
        format!(
            "uptime={uptime_min:.1}m cycles={cycles} opps={opps} tri={} hit_rate={hit_rate} \
             arbs={} profit={} gas={} sim_fail={} exec_fail={} jito={} pools={} backruns={}",
            self.triangular_opportunities.load(Ordering::Relaxed),
            self.successful_arbs.load(Ordering::Relaxed),
            self.total_profit.load(Ordering::Relaxed),
            self.total_gas_spent.load(Ordering::Relaxed),
            self.simulation_failures.load(Ordering::Relaxed),
            self.execution_failures.load(Ordering::Relaxed),
            self.jito_submissions.load(Ordering::Relaxed),
            self.new_pools_detected.load(Ordering::Relaxed),
            self.backrun_signals.load(Ordering::Relaxed),
        )
    }
}

impl Default for BotMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = BotMetrics::new();
        m.incr(&m.scan_cycles);
        m.incr(&m.scan_cycles);
        m.incr(&m.opportunities_found);
        m.add_profit(1_500);
        m.add_profit(-300);
        assert_eq!(m.scan_cycles.load(Ordering::Relaxed), 2);
        assert_eq!(m.total_profit.load(Ordering::Relaxed), 1_200);
        let s = m.summary();
        assert!(s.contains("cycles=2"));
        assert!(s.contains("hit_rate=50.0%"));
    }
}
