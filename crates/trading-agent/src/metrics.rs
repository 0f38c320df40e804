use std::time::Instant;

use rust_decimal::Decimal;

use crate::cycle::CycleOutcome;

/// Running counters for the live agent, logged every N cycles.
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub signals_generated: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub orders_skipped: u64,
    pub producer_failures: u64,
    pub flatten_cycles: u64,
    pub last_portfolio_value: Decimal,
    pub last_drawdown: Decimal,
    pub last_total_duration_ms: u64,
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            signals_generated: 0,
            orders_filled: 0,
            orders_rejected: 0,
            orders_skipped: 0,
            producer_failures: 0,
            flatten_cycles: 0,
            last_portfolio_value: Decimal::ZERO,
            last_drawdown: Decimal::ZERO,
            last_total_duration_ms: 0,
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_cycle(&mut self, outcome: &CycleOutcome, cycle_start: Instant) {
        self.signals_generated += outcome.signals as u64;
        self.orders_filled += outcome.filled as u64;
        self.orders_rejected += outcome.rejected as u64;
        self.orders_skipped += outcome.skipped as u64;
        self.producer_failures += outcome.producer_failures as u64;
        if outcome.flattened {
            self.flatten_cycles += 1;
        }
        self.last_portfolio_value = outcome.portfolio_value;
        self.last_drawdown = outcome.drawdown;
        self.finish_cycle(cycle_start);
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        if self.log_interval_cycles > 0 && self.cycles_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    /// Filled share of submitted orders (0-100%).
    pub fn fill_rate(&self) -> f64 {
        let submitted = self.orders_filled + self.orders_rejected;
        if submitted == 0 {
            return 0.0;
        }
        self.orders_filled as f64 / submitted as f64 * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            signals = self.signals_generated,
            filled = self.orders_filled,
            rejected = self.orders_rejected,
            skipped = self.orders_skipped,
            producer_failures = self.producer_failures,
            flatten_cycles = self.flatten_cycles,
            fill_rate_pct = self.fill_rate(),
            portfolio_value = %self.last_portfolio_value,
            drawdown = %self.last_drawdown,
            last_cycle_ms = self.last_total_duration_ms,
            "Agent metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn outcome(filled: usize, rejected: usize, flattened: bool) -> CycleOutcome {
        CycleOutcome {
            cycle_id: "c".to_string(),
            timestamp: Utc::now(),
            signals: filled + rejected,
            filled,
            rejected,
            skipped: 0,
            producer_failures: 1,
            flattened,
            portfolio_value: dec!(9500),
            drawdown: dec!(0.05),
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let mut metrics = AgentMetrics::new(0);
        metrics.record_cycle(&outcome(2, 1, false), AgentMetrics::start_timer());
        metrics.record_cycle(&outcome(1, 0, true), AgentMetrics::start_timer());

        assert_eq!(metrics.cycles_run, 2);
        assert_eq!(metrics.signals_generated, 4);
        assert_eq!(metrics.orders_filled, 3);
        assert_eq!(metrics.orders_rejected, 1);
        assert_eq!(metrics.producer_failures, 2);
        assert_eq!(metrics.flatten_cycles, 1);
        assert_eq!(metrics.last_portfolio_value, dec!(9500));
        assert!((metrics.fill_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_rate_without_orders() {
        assert_eq!(AgentMetrics::new(5).fill_rate(), 0.0);
    }
}
