//! The payment engine: one handle over settlement, withdrawals, webhooks,
//! onboarding and queries.

use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use marketpay_common::{LedgerError, OrganizationId, Result};
use marketpay_ledger::{
    InMemoryLedgerStore, IntegrityViolation, LedgerStore, PayerAccount, PgLedgerStore,
    WalletLedger,
};
use marketpay_payout::PayoutProvider;

use crate::config::EngineConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::onboarding::{AccountStatus, OnboardingService, OnboardingSession};
use crate::queries::LedgerQueries;
use crate::reconciler::{WebhookAck, WebhookReconciler};
use crate::settlement::{PaymentSettlement, SettlementReceipt, SettlementRequest};
use crate::state::EngineState;
use crate::withdrawal::{WithdrawalOrchestrator, WithdrawalReceipt};

/// Open the store named by the configuration: PostgreSQL when a database
/// URL is set, otherwise in memory.
pub async fn open_store(config: &EngineConfig) -> Result<Arc<dyn LedgerStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgLedgerStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            info!("Using PostgreSQL ledger store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory ledger store");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}

pub struct PaymentEngine {
    config: EngineConfig,
    state: Arc<RwLock<EngineState>>,
    ledger: Arc<WalletLedger>,
    withdrawals: Arc<WithdrawalOrchestrator>,
    settlement: PaymentSettlement,
    reconciler: WebhookReconciler,
    onboarding: OnboardingService,
    queries: LedgerQueries,
    metrics: SharedMetrics,
}

impl PaymentEngine {
    /// Wire the components over a store and a payout provider.
    ///
    /// Fails with `Configuration` if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn PayoutProvider>,
    ) -> Result<Self> {
        config.validate().map_err(LedgerError::Configuration)?;

        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let ledger = Arc::new(WalletLedger::new(store, config.withdrawal.minimum_amount));
        let withdrawals = Arc::new(WithdrawalOrchestrator::new(
            ledger.clone(),
            provider.clone(),
            config.withdrawal.clone(),
            config.provider.clone(),
            metrics.clone(),
        ));
        let settlement = PaymentSettlement::new(
            ledger.clone(),
            config.settlement.clone(),
            metrics.clone(),
        );
        let reconciler = WebhookReconciler::new(
            &config.webhook,
            ledger.clone(),
            withdrawals.clone(),
            metrics.clone(),
        )?;
        let onboarding = OnboardingService::new(ledger.clone(), provider, &config.provider);
        let queries = LedgerQueries::new(ledger.clone());

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(EngineState::Starting)),
            ledger,
            withdrawals,
            settlement,
            reconciler,
            onboarding,
            queries,
            metrics,
        })
    }

    /// Start accepting requests and re-dispatch withdrawals left `pending`
    /// by a previous run.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!("Starting payment engine");
        *self.state.write() = EngineState::Running;

        let resumed = self.withdrawals.resume_pending().await?;
        info!(resumed, "Payment engine started");
        Ok(())
    }

    /// Stop accepting requests and wait for in-flight payout submissions.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping payment engine");
        *self.state.write() = EngineState::ShuttingDown;

        let timeout = self.config.withdrawal.drain_timeout;
        if !self.withdrawals.drain(timeout).await {
            warn!(
                in_flight = self.withdrawals.in_flight_count(),
                timeout_secs = timeout.as_secs(),
                "Drain timed out with submissions still in flight"
            );
        }

        *self.state.write() = EngineState::Stopped;
        info!("Payment engine stopped");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting_requests() {
            Ok(())
        } else {
            Err(LedgerError::NotAccepting)
        }
    }

    pub async fn settle(&self, request: &SettlementRequest) -> Result<SettlementReceipt> {
        self.ensure_accepting()?;
        self.settlement.settle(request).await
    }

    pub async fn request_withdrawal(
        &self,
        organization_id: &OrganizationId,
        amount: Decimal,
    ) -> Result<WithdrawalReceipt> {
        self.ensure_accepting()?;
        self.withdrawals
            .request_withdrawal(organization_id, amount)
            .await
    }

    /// Webhook deliveries are refused with 503 outside the running state so
    /// the provider redelivers them.
    pub async fn handle_webhook(&self, payload: &[u8], signature: Option<&str>) -> WebhookAck {
        if !self.is_accepting_requests() {
            return WebhookAck {
                status: 503,
                message: "Not accepting deliveries".to_string(),
            };
        }
        self.reconciler.handle(payload, signature).await
    }

    pub async fn connect_account(
        &self,
        organization_id: &OrganizationId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingSession> {
        self.ensure_accepting()?;
        self.onboarding
            .connect_account(organization_id, refresh_url, return_url)
            .await
    }

    pub async fn refresh_onboarding_link(
        &self,
        organization_id: &OrganizationId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingSession> {
        self.ensure_accepting()?;
        self.onboarding
            .refresh_onboarding_link(organization_id, refresh_url, return_url)
            .await
    }

    pub async fn account_status(&self, organization_id: &OrganizationId) -> Result<AccountStatus> {
        self.onboarding.account_status(organization_id).await
    }

    /// Open a funding account for a paying organization.
    pub async fn open_payer_account(
        &self,
        organization_id: &OrganizationId,
        opening_balance: Decimal,
    ) -> Result<PayerAccount> {
        if opening_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "opening balance {} is negative",
                opening_balance
            )));
        }
        self.ledger
            .store()
            .create_payer_account(organization_id, opening_balance)
            .await
    }

    pub fn queries(&self) -> &LedgerQueries {
        &self.queries
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    pub async fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        self.ledger.verify_integrity().await
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn in_flight_submissions(&self) -> usize {
        self.withdrawals.in_flight_count()
    }
}
