//! Simulation metrics.

use std::collections::VecDeque;

/// Client-side tallies for one run.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    pub settlements_attempted: u64,
    pub settlements_succeeded: u64,
    /// Refused for insufficient payer funds.
    pub settlements_refused: u64,
    pub settlements_errored: u64,
    pub withdrawals_attempted: u64,
    pub withdrawals_accepted: u64,
    pub withdrawals_refused: u64,
    pub webhooks_delivered: u64,
    pub webhooks_acknowledged: u64,
    pub webhooks_rejected: u64,
    /// Settlement latency samples (ms).
    latency_samples: VecDeque<u64>,
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            settlements_attempted: 0,
            settlements_succeeded: 0,
            settlements_refused: 0,
            settlements_errored: 0,
            withdrawals_attempted: 0,
            withdrawals_accepted: 0,
            withdrawals_refused: 0,
            webhooks_delivered: 0,
            webhooks_acknowledged: 0,
            webhooks_rejected: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    pub fn record_settlement(&mut self, latency_ms: u64) {
        self.settlements_attempted += 1;
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    pub fn record_webhook(&mut self, acknowledged: bool) {
        self.webhooks_delivered += 1;
        if acknowledged {
            self.webhooks_acknowledged += 1;
        } else {
            self.webhooks_rejected += 1;
        }
    }

    /// Average settlement latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn settlement_success_rate(&self) -> f64 {
        if self.settlements_attempted == 0 {
            return 0.0;
        }

        self.settlements_succeeded as f64 / self.settlements_attempted as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        for latency in [100, 200, 150, 30] {
            metrics.record_settlement(latency);
        }
        metrics.settlements_succeeded = 3;
        metrics.record_webhook(true);
        metrics.record_webhook(false);

        assert_eq!(metrics.settlements_attempted, 4);
        assert_eq!(metrics.average_latency_ms(), 120);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.settlement_success_rate(), 0.75);
        assert_eq!(metrics.webhooks_delivered, 2);
        assert_eq!(metrics.webhooks_rejected, 1);
    }
}
