//! Metrics collection for engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine metrics.
pub struct Metrics {
    /// Settlements attempted.
    pub settlements_total: AtomicU64,
    /// Settlements that moved money.
    pub settlements_success: AtomicU64,
    /// Settlements refused before any money moved.
    pub settlements_failed: AtomicU64,
    /// Settlements that debited the payer without crediting the payee.
    pub settlements_inconsistent: AtomicU64,
    /// Withdrawal requests accepted.
    pub withdrawals_requested: AtomicU64,
    /// Withdrawal requests refused by validation.
    pub withdrawals_refused: AtomicU64,
    /// Withdrawals that reached `completed`.
    pub withdrawals_completed: AtomicU64,
    /// Withdrawals that reached `failed`.
    pub withdrawals_failed: AtomicU64,
    /// Withdrawals moved to `rejected` at submission.
    pub withdrawals_rejected: AtomicU64,
    /// Completed withdrawals reversed by a delayed failure.
    pub withdrawals_reversed: AtomicU64,
    /// Payout submissions currently running.
    pub submissions_in_flight: AtomicU64,
    /// Provider calls that timed out.
    pub provider_timeouts: AtomicU64,
    /// Webhook deliveries received.
    pub webhooks_received: AtomicU64,
    /// Webhook deliveries refused for a bad signature.
    pub webhooks_rejected: AtomicU64,
    /// Webhook deliveries whose handler returned an error.
    pub webhook_errors: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            settlements_total: AtomicU64::new(0),
            settlements_success: AtomicU64::new(0),
            settlements_failed: AtomicU64::new(0),
            settlements_inconsistent: AtomicU64::new(0),
            withdrawals_requested: AtomicU64::new(0),
            withdrawals_refused: AtomicU64::new(0),
            withdrawals_completed: AtomicU64::new(0),
            withdrawals_failed: AtomicU64::new(0),
            withdrawals_rejected: AtomicU64::new(0),
            withdrawals_reversed: AtomicU64::new(0),
            submissions_in_flight: AtomicU64::new(0),
            provider_timeouts: AtomicU64::new(0),
            webhooks_received: AtomicU64::new(0),
            webhooks_rejected: AtomicU64::new(0),
            webhook_errors: AtomicU64::new(0),
        }
    }

    pub fn settlement_initiated(&self) {
        self.settlements_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_success(&self) {
        self.settlements_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_failed(&self) {
        self.settlements_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_inconsistent(&self) {
        self.settlements_inconsistent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_requested(&self) {
        self.withdrawals_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_refused(&self) {
        self.withdrawals_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_completed(&self) {
        self.withdrawals_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_failed(&self) {
        self.withdrawals_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_rejected(&self) {
        self.withdrawals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_reversed(&self) {
        self.withdrawals_reversed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission task starting.
    pub fn submission_started(&self) {
        self.submissions_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission task finishing.
    pub fn submission_finished(&self) {
        self.submissions_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn provider_timeout(&self) {
        self.provider_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_received(&self) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_error(&self) {
        self.webhook_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            settlements_total: self.settlements_total.load(Ordering::Relaxed),
            settlements_success: self.settlements_success.load(Ordering::Relaxed),
            settlements_failed: self.settlements_failed.load(Ordering::Relaxed),
            settlements_inconsistent: self.settlements_inconsistent.load(Ordering::Relaxed),
            withdrawals_requested: self.withdrawals_requested.load(Ordering::Relaxed),
            withdrawals_refused: self.withdrawals_refused.load(Ordering::Relaxed),
            withdrawals_completed: self.withdrawals_completed.load(Ordering::Relaxed),
            withdrawals_failed: self.withdrawals_failed.load(Ordering::Relaxed),
            withdrawals_rejected: self.withdrawals_rejected.load(Ordering::Relaxed),
            withdrawals_reversed: self.withdrawals_reversed.load(Ordering::Relaxed),
            submissions_in_flight: self.submissions_in_flight.load(Ordering::Relaxed),
            provider_timeouts: self.provider_timeouts.load(Ordering::Relaxed),
            webhooks_received: self.webhooks_received.load(Ordering::Relaxed),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::Relaxed),
            webhook_errors: self.webhook_errors.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 15] = [
            ("settlements_total", "counter", "Total settlements attempted", s.settlements_total),
            ("settlements_success", "counter", "Settlements that moved money", s.settlements_success),
            ("settlements_failed", "counter", "Settlements refused before moving money", s.settlements_failed),
            ("settlements_inconsistent", "counter", "Settlements left needing remediation", s.settlements_inconsistent),
            ("withdrawals_requested", "counter", "Withdrawal requests accepted", s.withdrawals_requested),
            ("withdrawals_refused", "counter", "Withdrawal requests refused by validation", s.withdrawals_refused),
            ("withdrawals_completed", "counter", "Withdrawals completed", s.withdrawals_completed),
            ("withdrawals_failed", "counter", "Withdrawals failed", s.withdrawals_failed),
            ("withdrawals_rejected", "counter", "Withdrawals rejected at submission", s.withdrawals_rejected),
            ("withdrawals_reversed", "counter", "Completed withdrawals reversed", s.withdrawals_reversed),
            ("submissions_in_flight", "gauge", "Payout submissions in flight", s.submissions_in_flight),
            ("provider_timeouts", "counter", "Provider calls that timed out", s.provider_timeouts),
            ("webhooks_received", "counter", "Webhook deliveries received", s.webhooks_received),
            ("webhooks_rejected", "counter", "Webhook deliveries with bad signatures", s.webhooks_rejected),
            ("webhook_errors", "counter", "Webhook deliveries whose handler failed", s.webhook_errors),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP marketpay_{name} {help}\n# TYPE marketpay_{name} {kind}\nmarketpay_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub settlements_total: u64,
    pub settlements_success: u64,
    pub settlements_failed: u64,
    pub settlements_inconsistent: u64,
    pub withdrawals_requested: u64,
    pub withdrawals_refused: u64,
    pub withdrawals_completed: u64,
    pub withdrawals_failed: u64,
    pub withdrawals_rejected: u64,
    pub withdrawals_reversed: u64,
    pub submissions_in_flight: u64,
    pub provider_timeouts: u64,
    pub webhooks_received: u64,
    pub webhooks_rejected: u64,
    pub webhook_errors: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
