//! Payout provider trait and a scriptable mock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketpay_common::{
    to_minor_units, AccountCapabilities, Currency, OrganizationId, PayoutId, ProviderAccountId,
    WalletId, Withdrawal, WithdrawalId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// A hosted onboarding link for a connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Metadata attached to every payout so webhooks can be matched back to the
/// withdrawal that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutMetadata {
    pub withdrawal_id: WithdrawalId,
    pub wallet_id: WalletId,
    pub organization_id: OrganizationId,
}

/// A payout to a connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub account_id: ProviderAccountId,
    /// Ledger amount, kept for logging.
    pub amount: Decimal,
    /// Amount in integer minor units, as sent to the provider.
    pub amount_minor: i64,
    pub currency: Currency,
    pub metadata: PayoutMetadata,
}

impl PayoutRequest {
    /// Build the payout for a withdrawal.
    pub fn for_withdrawal(
        withdrawal: &Withdrawal,
        account_id: ProviderAccountId,
        currency: Currency,
    ) -> ProviderResult<Self> {
        let amount_minor = to_minor_units(withdrawal.amount)
            .filter(|minor| *minor > 0)
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!(
                    "amount {} cannot be paid out",
                    withdrawal.amount
                ))
            })?;

        Ok(Self {
            account_id,
            amount: withdrawal.amount,
            amount_minor,
            currency,
            metadata: PayoutMetadata {
                withdrawal_id: withdrawal.id,
                wallet_id: withdrawal.wallet_id,
                organization_id: withdrawal.organization_id.clone(),
            },
        })
    }
}

/// Capability interface to an external payout provider.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Create a connected account for an organization's wallet.
    async fn create_connected_account(
        &self,
        organization_id: &OrganizationId,
        wallet_id: WalletId,
    ) -> ProviderResult<ProviderAccountId>;

    /// Create a hosted onboarding link for a connected account.
    async fn create_onboarding_link(
        &self,
        account_id: &ProviderAccountId,
        refresh_url: &str,
        return_url: &str,
    ) -> ProviderResult<OnboardingLink>;

    /// Fetch the account's current capability flags.
    async fn get_account_status(
        &self,
        account_id: &ProviderAccountId,
    ) -> ProviderResult<AccountCapabilities>;

    /// Create a payout. Returns the provider's payout reference.
    async fn create_payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutId>;
}

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct MockAccount {
        organization_id: OrganizationId,
        capabilities: AccountCapabilities,
    }

    /// In-process payout provider for tests and the simulator.
    ///
    /// Failures and latency are scripted up front; every accepted payout is
    /// recorded.
    #[derive(Default)]
    pub struct MockPayoutProvider {
        accounts: DashMap<ProviderAccountId, MockAccount>,
        payouts: Mutex<Vec<(PayoutId, PayoutRequest)>>,
        payout_failures: Mutex<VecDeque<ProviderError>>,
        payout_delay: Mutex<Option<Duration>>,
        status_failures: AtomicU32,
    }

    impl MockPayoutProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an account directly, bypassing `create_connected_account`.
        pub fn add_account(
            &self,
            account_id: ProviderAccountId,
            organization_id: OrganizationId,
            capabilities: AccountCapabilities,
        ) {
            self.accounts.insert(
                account_id,
                MockAccount {
                    organization_id,
                    capabilities,
                },
            );
        }

        /// Change what `get_account_status` reports for an account.
        pub fn set_account_status(
            &self,
            account_id: &ProviderAccountId,
            capabilities: AccountCapabilities,
        ) {
            if let Some(mut account) = self.accounts.get_mut(account_id) {
                account.capabilities = capabilities;
            }
        }

        /// Connected account created for an organization, if any.
        pub fn account_for(&self, organization_id: &OrganizationId) -> Option<ProviderAccountId> {
            self.accounts
                .iter()
                .find(|entry| &entry.value().organization_id == organization_id)
                .map(|entry| entry.key().clone())
        }

        /// Fail the next `create_payout` call with `error`. Calls queue up.
        pub fn fail_next_payout(&self, error: ProviderError) {
            self.payout_failures.lock().push_back(error);
        }

        /// Fail the next `times` calls to `get_account_status`.
        pub fn fail_next_status(&self, times: u32) {
            self.status_failures.store(times, Ordering::SeqCst);
        }

        /// Sleep this long inside every `create_payout` call.
        pub fn set_payout_delay(&self, delay: Option<Duration>) {
            *self.payout_delay.lock() = delay;
        }

        /// Accepted payouts, in submission order.
        pub fn payouts(&self) -> Vec<(PayoutId, PayoutRequest)> {
            self.payouts.lock().clone()
        }

        pub fn payout_count(&self) -> usize {
            self.payouts.lock().len()
        }

        /// Payout created for a withdrawal, if any.
        pub fn payout_for(&self, withdrawal_id: WithdrawalId) -> Option<PayoutId> {
            self.payouts
                .lock()
                .iter()
                .find(|(_, request)| request.metadata.withdrawal_id == withdrawal_id)
                .map(|(id, _)| id.clone())
        }

        fn take_status_failure(&self) -> bool {
            self.status_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl PayoutProvider for MockPayoutProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn create_connected_account(
            &self,
            organization_id: &OrganizationId,
            _wallet_id: WalletId,
        ) -> ProviderResult<ProviderAccountId> {
            let account_id =
                ProviderAccountId::new(format!("acct_{}", uuid::Uuid::new_v4().simple()));
            self.add_account(
                account_id.clone(),
                organization_id.clone(),
                AccountCapabilities::default(),
            );
            Ok(account_id)
        }

        async fn create_onboarding_link(
            &self,
            account_id: &ProviderAccountId,
            _refresh_url: &str,
            _return_url: &str,
        ) -> ProviderResult<OnboardingLink> {
            if !self.accounts.contains_key(account_id) {
                return Err(ProviderError::AccountNotFound(account_id.clone()));
            }
            Ok(OnboardingLink {
                url: format!(
                    "https://connect.mock.test/setup/{}/{}",
                    account_id,
                    uuid::Uuid::new_v4().simple()
                ),
                expires_at: Utc::now() + marketpay_common::constants::onboarding_link_validity(),
            })
        }

        async fn get_account_status(
            &self,
            account_id: &ProviderAccountId,
        ) -> ProviderResult<AccountCapabilities> {
            if self.take_status_failure() {
                return Err(ProviderError::Unavailable("scripted status failure".into()));
            }
            self.accounts
                .get(account_id)
                .map(|account| account.capabilities)
                .ok_or_else(|| ProviderError::AccountNotFound(account_id.clone()))
        }

        async fn create_payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutId> {
            let delay = *self.payout_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = self.payout_failures.lock().pop_front();
            if let Some(error) = scripted {
                return Err(error);
            }
            if !self.accounts.contains_key(&request.account_id) {
                return Err(ProviderError::AccountNotFound(request.account_id.clone()));
            }

            let payout_id = PayoutId::new(format!("po_{}", uuid::Uuid::new_v4().simple()));
            self.payouts.lock().push((payout_id.clone(), request.clone()));
            Ok(payout_id)
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockPayoutProvider;
