//! Shared fixtures for engine tests.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use marketpay_common::{
    AccountCapabilities, OrganizationId, ProviderAccountId, WithdrawalId, WithdrawalStatus,
    Withdrawal,
};
use marketpay_ledger::{InMemoryLedgerStore, LedgerStore, Wallet, WalletLedger};
use marketpay_payout::MockPayoutProvider;

use crate::config::{EngineConfig, ProviderConfig, WithdrawalConfig};
use crate::metrics::{Metrics, SharedMetrics};
use crate::withdrawal::WithdrawalOrchestrator;

pub(crate) const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub(crate) fn enabled() -> AccountCapabilities {
    AccountCapabilities {
        onboarding_completed: true,
        payouts_enabled: true,
        charges_enabled: true,
    }
}

pub(crate) fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.webhook.secret = WEBHOOK_SECRET.to_string();
    config.provider = ProviderConfig {
        call_timeout: Duration::from_millis(200),
    };
    config.withdrawal = WithdrawalConfig {
        drain_timeout: Duration::from_secs(2),
        drain_poll_interval: Duration::from_millis(5),
        ..WithdrawalConfig::default()
    };
    config
}

pub(crate) struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub provider: Arc<MockPayoutProvider>,
    pub ledger: Arc<WalletLedger>,
    pub metrics: SharedMetrics,
    pub withdrawals: Arc<WithdrawalOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        let config = test_config();
        let store = Arc::new(InMemoryLedgerStore::new());
        let provider = Arc::new(MockPayoutProvider::new());
        let ledger = Arc::new(WalletLedger::new(
            store.clone(),
            config.withdrawal.minimum_amount,
        ));
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let withdrawals = Arc::new(WithdrawalOrchestrator::new(
            ledger.clone(),
            provider.clone(),
            config.withdrawal.clone(),
            config.provider.clone(),
            metrics.clone(),
        ));
        Self {
            store,
            provider,
            ledger,
            metrics,
            withdrawals,
        }
    }

    /// A wallet with a provider account, payouts enabled, and `balance` earned.
    pub async fn onboarded_wallet(&self, org: &str, balance: Decimal) -> Wallet {
        let org = OrganizationId::new(org);
        let wallet = self.ledger.ensure_wallet(&org).await.unwrap();
        let account = ProviderAccountId::new(format!("acct_{org}"));
        self.provider
            .add_account(account.clone(), org.clone(), enabled());
        self.store
            .set_provider_account(wallet.id, &account, None)
            .await
            .unwrap();
        let mut wallet = self
            .ledger
            .update_capabilities(wallet.id, enabled())
            .await
            .unwrap();
        if !balance.is_zero() {
            wallet = self.ledger.apply_delta(wallet.id, balance).await.unwrap();
        }
        wallet
    }

    pub async fn wallet(&self, org: &str) -> Wallet {
        self.ledger.wallet(&OrganizationId::new(org)).await.unwrap()
    }

    pub async fn withdrawal(&self, id: WithdrawalId) -> Withdrawal {
        self.store.get_withdrawal(id).await.unwrap().unwrap()
    }

    /// Poll until the withdrawal reaches `status`.
    pub async fn wait_for_status(&self, id: WithdrawalId, status: WithdrawalStatus) -> Withdrawal {
        for _ in 0..400 {
            let withdrawal = self.withdrawal(id).await;
            if withdrawal.status == status {
                return withdrawal;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("withdrawal {id} never reached {status}");
    }
}
