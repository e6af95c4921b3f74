//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{info, warn};

use marketpay_common::{
    to_minor_units, unix_now, AccountCapabilities, FunctionId, LedgerError,
    OrganizationId, PayoutId, Withdrawal, WithdrawalStatus,
};
use marketpay_crypto::WebhookVerifier;
use marketpay_engine::{EngineConfig, PaymentEngine, SettlementRequest};
use marketpay_ledger::InMemoryLedgerStore;
use marketpay_payout::{fixtures, MockPayoutProvider, ProviderError};

use crate::metrics::SimulationMetrics;
use crate::scenario::Scenario;

const ONBOARDING_REFRESH_URL: &str = "https://sim.marketpay.test/onboarding/refresh";
const ONBOARDING_RETURN_URL: &str = "https://sim.marketpay.test/onboarding/return";

/// Ledger checks after a run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub integrity_violations: usize,
    /// Wallets whose outstanding withdrawals exceed their balance.
    pub overcommitted_wallets: usize,
    /// Withdrawals per final status.
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub outstanding: usize,
    pub total_withdrawn: Decimal,
    pub total_earned: Decimal,
}

impl SimulationReport {
    pub fn is_consistent(&self) -> bool {
        self.integrity_violations == 0 && self.overcommitted_wallets == 0
    }
}

/// Drives one seeded run against an in-memory engine.
pub struct SimulationController {
    engine: Arc<PaymentEngine>,
    provider: Arc<MockPayoutProvider>,
    signer: WebhookVerifier,
    rng: StdRng,
    payers: Vec<OrganizationId>,
    developers: Vec<OrganizationId>,
    payer_balance: Decimal,
    metrics: SimulationMetrics,
}

impl SimulationController {
    pub fn new(
        config: EngineConfig,
        payers: usize,
        developers: usize,
        payer_balance: Decimal,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let signer = WebhookVerifier::new(&config.webhook.secret, config.webhook.signature_tolerance)
            .context("building webhook signer")?;
        let provider = Arc::new(MockPayoutProvider::new());
        let engine = PaymentEngine::new(
            config,
            Arc::new(InMemoryLedgerStore::new()),
            provider.clone(),
        )
        .context("building payment engine")?;

        Ok(Self {
            engine: Arc::new(engine),
            provider,
            signer,
            rng,
            payers: (0..payers)
                .map(|i| OrganizationId::new(format!("org_payer_{:03}", i)))
                .collect(),
            developers: (0..developers)
                .map(|i| OrganizationId::new(format!("org_dev_{:03}", i)))
                .collect(),
            payer_balance,
            metrics: SimulationMetrics::new(),
        })
    }

    pub fn engine(&self) -> &Arc<PaymentEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Fund payers and onboard developers.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        self.engine.start().await?;

        for payer in &self.payers {
            self.engine
                .open_payer_account(payer, self.payer_balance)
                .await?;
        }

        let enabled = AccountCapabilities {
            onboarding_completed: true,
            payouts_enabled: true,
            charges_enabled: true,
        };
        for developer in self.developers.clone() {
            let session = self
                .engine
                .connect_account(&developer, ONBOARDING_REFRESH_URL, ONBOARDING_RETURN_URL)
                .await?;
            self.provider.set_account_status(&session.account_id, enabled);

            // Half learn their capabilities from the webhook, half from a
            // status refresh.
            if self.rng.gen_bool(0.5) {
                let payload = fixtures::account_updated(&session.account_id, Some(&developer), enabled);
                self.deliver(payload).await?;
            } else {
                self.engine.account_status(&developer).await?;
            }
        }

        info!(
            payers = self.payers.len(),
            developers = self.developers.len(),
            "Simulation initialized"
        );
        Ok(())
    }

    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<SimulationReport> {
        info!(scenario = %scenario.name, description = %scenario.description, "Running scenario");

        self.run_settlements(scenario).await;
        self.run_withdrawals(scenario).await?;
        self.wait_for_submissions(Duration::from_secs(10)).await;
        self.run_webhooks(scenario).await?;

        self.engine.stop().await?;
        self.report().await
    }

    async fn run_settlements(&mut self, scenario: &Scenario) {
        if self.payers.is_empty() || self.developers.is_empty() {
            return;
        }

        let requests: Vec<SettlementRequest> = (0..scenario.settlements)
            .map(|i| SettlementRequest {
                payer_organization_id: self.payers[self.rng.gen_range(0..self.payers.len())].clone(),
                function_id: FunctionId::new(format!("fn_{:02}", i % 17)),
                payee_organization_id: self.developers
                    [self.rng.gen_range(0..self.developers.len())]
                .clone(),
                gross_amount: Decimal::new(self.rng.gen_range(1..=scenario.max_settlement_cents), 2),
            })
            .collect();

        let outcomes = join_all(requests.iter().map(|request| {
            let engine = self.engine.clone();
            async move {
                let started = Instant::now();
                let result = engine.settle(request).await;
                (result, started.elapsed())
            }
        }))
        .await;

        for (result, elapsed) in outcomes {
            self.metrics.record_settlement(elapsed.as_millis() as u64);
            match result {
                Ok(_) => self.metrics.settlements_succeeded += 1,
                Err(LedgerError::InsufficientFunds { .. }) => self.metrics.settlements_refused += 1,
                Err(e) => {
                    warn!(error_code = e.error_code(), error = %e, "Settlement failed");
                    self.metrics.settlements_errored += 1;
                }
            }
        }

        info!(
            succeeded = self.metrics.settlements_succeeded,
            refused = self.metrics.settlements_refused,
            "Settlement phase complete"
        );
    }

    async fn run_withdrawals(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        let mut requests = Vec::new();

        for developer in self.developers.clone() {
            let balance = self.engine.queries().wallet_balance(&developer).await?;
            if !balance.can_withdraw {
                continue;
            }
            let (Some(min), Some(max)) = (
                to_minor_units(balance.minimum_withdrawal),
                to_minor_units(balance.available_balance),
            ) else {
                continue;
            };
            if min > max {
                continue;
            }

            requests.push((developer.clone(), Decimal::new(self.rng.gen_range(min..=max), 2)));
            if self.rng.gen_bool(scenario.double_withdrawal_rate) {
                requests.push((developer, Decimal::new(self.rng.gen_range(min..=max), 2)));
            }
        }

        for _ in &requests {
            let roll: f64 = self.rng.gen();
            if roll < scenario.provider_rejection_rate {
                self.provider.fail_next_payout(ProviderError::Rejected {
                    code: "account_closed".to_string(),
                    message: "The bank account has been closed".to_string(),
                });
            } else if roll < scenario.provider_rejection_rate + scenario.provider_timeout_rate {
                self.provider.fail_next_payout(ProviderError::Timeout);
            }
        }

        let outcomes = join_all(requests.iter().map(|(developer, amount)| {
            let engine = self.engine.clone();
            async move { engine.request_withdrawal(developer, *amount).await }
        }))
        .await;

        for result in outcomes {
            self.metrics.withdrawals_attempted += 1;
            match result {
                Ok(_) => self.metrics.withdrawals_accepted += 1,
                Err(e) if e.is_client_error() => self.metrics.withdrawals_refused += 1,
                Err(e) => {
                    warn!(error_code = e.error_code(), error = %e, "Withdrawal failed");
                    self.metrics.withdrawals_refused += 1;
                }
            }
        }

        info!(
            accepted = self.metrics.withdrawals_accepted,
            refused = self.metrics.withdrawals_refused,
            "Withdrawal phase complete"
        );
        Ok(())
    }

    async fn wait_for_submissions(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.engine.in_flight_submissions() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    in_flight = self.engine.in_flight_submissions(),
                    "Submissions still in flight"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Play the provider's side: confirm or bounce every payout, with
    /// duplicates, shuffled order and a few forged deliveries.
    async fn run_webhooks(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        let mut deliveries: Vec<(Vec<u8>, bool)> = Vec::new();

        for withdrawal in self.all_withdrawals().await? {
            let payout_id = self
                .provider
                .payout_for(withdrawal.id)
                .unwrap_or_else(|| PayoutId::new(format!("po_sim_{}", withdrawal.id)));

            let payload = match withdrawal.status {
                WithdrawalStatus::Completed if self.rng.gen_bool(scenario.reversal_rate) => {
                    fixtures::payout_failed(
                        &payout_id,
                        Some(withdrawal.id),
                        "could_not_process",
                        "The bank could not process this payout",
                    )
                }
                WithdrawalStatus::Completed => fixtures::payout_paid(&payout_id, Some(withdrawal.id)),
                WithdrawalStatus::Processing if self.rng.gen_bool(0.5) => {
                    fixtures::payout_paid(&payout_id, Some(withdrawal.id))
                }
                WithdrawalStatus::Processing => fixtures::payout_failed(
                    &payout_id,
                    Some(withdrawal.id),
                    "insufficient_funds",
                    "Provider balance too low",
                ),
                _ => continue,
            };

            if self.rng.gen_bool(scenario.duplicate_rate) {
                deliveries.push((payload.clone(), true));
            }
            deliveries.push((payload, true));
        }

        deliveries.push((fixtures::unknown("balance.available"), true));
        for _ in 0..scenario.forged_deliveries {
            deliveries.push((fixtures::unknown("payout.paid"), false));
        }
        deliveries.shuffle(&mut self.rng);

        let now = unix_now();
        let signed: Vec<(Vec<u8>, String)> = deliveries
            .into_iter()
            .map(|(payload, genuine)| -> anyhow::Result<(Vec<u8>, String)> {
                let header = if genuine {
                    self.signer.sign(&payload, now)?
                } else {
                    format!("t={},v1={}", now, "00".repeat(32))
                };
                Ok((payload, header))
            })
            .collect::<anyhow::Result<_>>()?;

        let acks = join_all(signed.iter().map(|(payload, header)| {
            let engine = self.engine.clone();
            async move { engine.handle_webhook(payload, Some(header)).await }
        }))
        .await;

        for ack in acks {
            self.metrics.record_webhook(ack.is_success());
        }

        info!(
            delivered = self.metrics.webhooks_delivered,
            rejected = self.metrics.webhooks_rejected,
            "Webhook phase complete"
        );
        Ok(())
    }

    async fn deliver(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        let header = self.signer.sign(&payload, unix_now())?;
        let ack = self.engine.handle_webhook(&payload, Some(&header)).await;
        self.metrics.record_webhook(ack.is_success());
        anyhow::ensure!(ack.is_success(), "webhook refused: {}", ack.message);
        Ok(())
    }

    async fn all_withdrawals(&self) -> anyhow::Result<Vec<Withdrawal>> {
        let mut withdrawals = Vec::new();
        for developer in &self.developers {
            let mut page = 1;
            loop {
                let batch = self
                    .engine
                    .queries()
                    .withdrawal_history(developer, Some(page), None)
                    .await?;
                let done = batch.items.len() < batch.limit as usize;
                withdrawals.extend(batch.items);
                if done {
                    break;
                }
                page += 1;
            }
        }
        Ok(withdrawals)
    }

    async fn report(&self) -> anyhow::Result<SimulationReport> {
        let mut report = SimulationReport {
            integrity_violations: self.engine.verify_integrity().await?.len(),
            ..SimulationReport::default()
        };

        for developer in &self.developers {
            let balance = self.engine.queries().wallet_balance(developer).await?;
            if balance.pending_withdrawals > balance.balance {
                warn!(
                    wallet_id = %balance.wallet_id,
                    pending = %balance.pending_withdrawals,
                    balance = %balance.balance,
                    "Outstanding withdrawals exceed balance"
                );
                report.overcommitted_wallets += 1;
            }
            report.total_earned += balance.total_earned;
            report.total_withdrawn += balance.total_withdrawn;
        }

        for withdrawal in self.all_withdrawals().await? {
            match withdrawal.status {
                WithdrawalStatus::Completed => report.completed += 1,
                WithdrawalStatus::Failed => report.failed += 1,
                WithdrawalStatus::Rejected => report.rejected += 1,
                WithdrawalStatus::Pending | WithdrawalStatus::Processing => report.outstanding += 1,
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.webhook.secret = "whsec_simulator_test".to_string();
        config.provider.call_timeout = Duration::from_millis(200);
        config.withdrawal.drain_timeout = Duration::from_secs(2);
        config
    }

    #[tokio::test]
    async fn test_scenarios_keep_ledger_consistent() {
        for name in Scenario::names() {
            let mut scenario = Scenario::load(name).unwrap();
            scenario.settlements = 60;

            let mut controller =
                SimulationController::new(config(), 3, 5, dec!(400), Some(7)).unwrap();
            controller.initialize().await.unwrap();
            let report = controller.run_scenario(&scenario).await.unwrap();

            assert!(report.is_consistent(), "{name}: {report:?}");
            let metrics = controller.metrics();
            assert_eq!(metrics.settlements_attempted, 60);
            assert_eq!(metrics.webhooks_rejected, scenario.forged_deliveries as u64);
            assert_eq!(report.outstanding, 0, "{name}: {report:?}");
        }
    }

    #[tokio::test]
    async fn test_payers_never_overspend() {
        let mut scenario = Scenario::load("steady").unwrap();
        scenario.settlements = 80;
        scenario.max_settlement_cents = 5_000;
        scenario.reversal_rate = 0.0;

        let mut controller = SimulationController::new(config(), 1, 2, dec!(100), Some(11)).unwrap();
        controller.initialize().await.unwrap();
        let report = controller.run_scenario(&scenario).await.unwrap();

        assert!(report.total_earned <= dec!(100));
        assert!(controller.metrics().settlements_refused > 0);
    }
}
