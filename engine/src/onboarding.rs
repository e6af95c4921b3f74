//! Connected-account onboarding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use marketpay_common::{
    AccountCapabilities, LedgerError, OrganizationId, ProviderAccountId, Result, WalletId,
};
use marketpay_ledger::{LedgerStore, Wallet, WalletLedger};
use marketpay_payout::{OnboardingLink, PayoutProvider, ProviderError, ProviderResult};

use crate::config::ProviderConfig;
use crate::wallet_locks::WalletLocks;

/// An onboarding link handed to a developer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingSession {
    pub wallet_id: WalletId,
    pub account_id: ProviderAccountId,
    pub onboarding_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Connected-account status as shown to the developer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStatus {
    pub wallet_id: WalletId,
    pub account_id: Option<ProviderAccountId>,
    pub capabilities: AccountCapabilities,
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub can_withdraw: bool,
    pub minimum_withdrawal: Decimal,
    /// `false` when the provider could not be reached and the flags are the
    /// last values stored.
    pub refreshed: bool,
}

/// Links developer wallets to provider accounts.
pub struct OnboardingService {
    ledger: Arc<WalletLedger>,
    provider: Arc<dyn PayoutProvider>,
    call_timeout: Duration,
    /// Serializes account creation per wallet.
    locks: WalletLocks,
}

impl OnboardingService {
    pub fn new(
        ledger: Arc<WalletLedger>,
        provider: Arc<dyn PayoutProvider>,
        config: &ProviderConfig,
    ) -> Self {
        Self {
            ledger,
            provider,
            call_timeout: config.call_timeout,
            locks: WalletLocks::new(),
        }
    }

    /// Create the wallet and provider account as needed and return an
    /// onboarding link. Calling it again reuses the existing account.
    #[instrument(skip(self, refresh_url, return_url), fields(organization_id = %organization_id))]
    pub async fn connect_account(
        &self,
        organization_id: &OrganizationId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingSession> {
        let wallet_id = self.ledger.ensure_wallet(organization_id).await?.id;

        let _guard = self.locks.lock(wallet_id).await;
        // A concurrent call may have linked an account while we waited.
        let wallet = self
            .ledger
            .store()
            .get_wallet_by_id(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;

        let account_id = match wallet.provider_account_id.clone() {
            Some(account_id) => account_id,
            None => {
                let account_id = self
                    .bounded(
                        self.provider
                            .create_connected_account(organization_id, wallet.id),
                    )
                    .await?;
                self.ledger
                    .store()
                    .set_provider_account(wallet.id, &account_id, None)
                    .await?;
                info!(wallet_id = %wallet.id, account_id = %account_id, "Provider account created");
                account_id
            }
        };

        self.issue_link(&wallet, account_id, refresh_url, return_url)
            .await
    }

    /// Issue a fresh onboarding link for an existing provider account.
    #[instrument(skip(self, refresh_url, return_url), fields(organization_id = %organization_id))]
    pub async fn refresh_onboarding_link(
        &self,
        organization_id: &OrganizationId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingSession> {
        let wallet = self.ledger.wallet(organization_id).await?;
        let account_id = wallet
            .provider_account_id
            .clone()
            .ok_or(LedgerError::NoProviderAccount(wallet.id))?;
        self.issue_link(&wallet, account_id, refresh_url, return_url)
            .await
    }

    /// Refresh capability flags from the provider and report account status.
    ///
    /// Provider or storage failures during the refresh fall back to the
    /// stored flags.
    #[instrument(skip(self), fields(organization_id = %organization_id))]
    pub async fn account_status(&self, organization_id: &OrganizationId) -> Result<AccountStatus> {
        let mut wallet = self.ledger.wallet(organization_id).await?;
        let mut refreshed = false;

        if let Some(account_id) = wallet.provider_account_id.clone() {
            match self
                .bounded(self.provider.get_account_status(&account_id))
                .await
            {
                Ok(capabilities) => {
                    match self.ledger.update_capabilities(wallet.id, capabilities).await {
                        Ok(updated) => {
                            wallet = updated;
                            refreshed = true;
                        }
                        Err(e) => {
                            warn!(wallet_id = %wallet.id, error = %e, "Failed to store refreshed capabilities");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        wallet_id = %wallet.id,
                        error = %e,
                        "Provider status unavailable, using stored capabilities"
                    );
                }
            }
        }

        let summary = self.ledger.balance_summary(organization_id).await?;
        Ok(AccountStatus {
            wallet_id: wallet.id,
            account_id: wallet.provider_account_id.clone(),
            capabilities: wallet.capabilities,
            balance: summary.balance,
            total_earned: summary.total_earned,
            total_withdrawn: summary.total_withdrawn,
            can_withdraw: summary.can_withdraw,
            minimum_withdrawal: summary.minimum_withdrawal,
            refreshed,
        })
    }

    async fn issue_link(
        &self,
        wallet: &Wallet,
        account_id: ProviderAccountId,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<OnboardingSession> {
        let OnboardingLink { url, expires_at } = self
            .bounded(
                self.provider
                    .create_onboarding_link(&account_id, refresh_url, return_url),
            )
            .await?;
        self.ledger
            .store()
            .set_provider_account(wallet.id, &account_id, Some(&url))
            .await?;

        Ok(OnboardingSession {
            wallet_id: wallet.id,
            account_id,
            onboarding_url: url,
            expires_at,
        })
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = ProviderResult<T>>,
    ) -> ProviderResult<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(ProviderError::Timeout))
    }
}
