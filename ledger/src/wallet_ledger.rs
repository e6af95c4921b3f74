//! Wallet ledger: the only code path that changes wallet balances.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use marketpay_common::{AccountCapabilities, LedgerError, OrganizationId, Result, WalletId};

use crate::account::Wallet;
use crate::balance::{IntegrityViolation, WalletBalance};
use crate::store::{LedgerStore, Page, MAX_PAGE_SIZE};

/// Balance rules over individual wallets.
pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
    minimum_withdrawal: Decimal,
}

impl WalletLedger {
    /// Create a wallet ledger over a store.
    pub fn new(store: Arc<dyn LedgerStore>, minimum_withdrawal: Decimal) -> Self {
        Self {
            store,
            minimum_withdrawal,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn minimum_withdrawal(&self) -> Decimal {
        self.minimum_withdrawal
    }

    /// Apply a signed delta to a wallet in one atomic storage update.
    ///
    /// Positive amounts count as earnings, negative amounts as withdrawals.
    #[instrument(skip(self), fields(wallet_id = %wallet_id, amount = %amount))]
    pub async fn apply_delta(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("balance delta must be non-zero".into()));
        }
        let wallet = self.store.apply_balance_delta(wallet_id, amount).await?;
        debug!(balance = %wallet.balance, "Wallet balance updated");
        Ok(wallet)
    }

    /// Get the organization's wallet, creating an empty one on first use.
    pub async fn ensure_wallet(&self, organization_id: &OrganizationId) -> Result<Wallet> {
        if let Some(wallet) = self.store.get_wallet(organization_id).await? {
            return Ok(wallet);
        }
        let wallet = self.store.create_wallet(organization_id).await?;
        info!(
            organization_id = %organization_id,
            wallet_id = %wallet.id,
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Get the organization's wallet or fail with `WalletNotFound`.
    pub async fn wallet(&self, organization_id: &OrganizationId) -> Result<Wallet> {
        self.store
            .get_wallet(organization_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(organization_id.to_string()))
    }

    /// `balance - pending withdrawals`, computed live.
    pub async fn available_balance(&self, wallet_id: WalletId) -> Result<Decimal> {
        let wallet = self
            .store
            .get_wallet_by_id(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;
        self.available_for(&wallet).await
    }

    /// Available balance for an already-loaded wallet.
    pub async fn available_for(&self, wallet: &Wallet) -> Result<Decimal> {
        let pending = self.store.pending_withdrawals_total(wallet.id).await?;
        Ok(wallet.balance - pending)
    }

    /// Onboarded, payouts enabled, and at least the minimum available.
    pub async fn can_withdraw(&self, wallet: &Wallet) -> Result<bool> {
        if !wallet.capabilities.can_pay_out() {
            return Ok(false);
        }
        Ok(self.available_for(wallet).await? >= self.minimum_withdrawal)
    }

    /// Overwrite capability flags with provider-reported values.
    #[instrument(skip(self), fields(wallet_id = %wallet_id))]
    pub async fn update_capabilities(
        &self,
        wallet_id: WalletId,
        capabilities: AccountCapabilities,
    ) -> Result<Wallet> {
        let wallet = self
            .store
            .update_capabilities(wallet_id, capabilities)
            .await?;
        info!(
            onboarding_completed = capabilities.onboarding_completed,
            payouts_enabled = capabilities.payouts_enabled,
            charges_enabled = capabilities.charges_enabled,
            "Wallet capabilities updated"
        );
        Ok(wallet)
    }

    /// Balance summary for an organization.
    ///
    /// If the pending total cannot be computed the summary reports zero
    /// pending rather than failing the query.
    pub async fn balance_summary(&self, organization_id: &OrganizationId) -> Result<WalletBalance> {
        let wallet = self.wallet(organization_id).await?;
        let pending = match self.store.pending_withdrawals_total(wallet.id).await {
            Ok(total) => total,
            Err(e) => {
                warn!(
                    wallet_id = %wallet.id,
                    error = %e,
                    "Failed to compute pending withdrawals, reporting zero"
                );
                Decimal::ZERO
            }
        };
        let available = wallet.balance - pending;

        Ok(WalletBalance {
            wallet_id: wallet.id,
            organization_id: wallet.organization_id.clone(),
            balance: wallet.balance,
            total_earned: wallet.total_earned,
            total_withdrawn: wallet.total_withdrawn,
            pending_withdrawals: pending,
            available_balance: available,
            can_withdraw: wallet.capabilities.can_pay_out()
                && available >= self.minimum_withdrawal,
            minimum_withdrawal: self.minimum_withdrawal,
        })
    }

    /// Scan every wallet for invariant violations.
    pub async fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        let mut violations = Vec::new();
        let mut page_number = 1;

        loop {
            let page = Page::new(Some(page_number), Some(MAX_PAGE_SIZE));
            let wallets = self.store.list_wallets(page).await?;

            for wallet in &wallets {
                if !wallet.is_balanced() {
                    violations.push(IntegrityViolation::Unbalanced {
                        wallet_id: wallet.id,
                        balance: wallet.balance,
                        total_earned: wallet.total_earned,
                        total_withdrawn: wallet.total_withdrawn,
                    });
                }
                let pending = self.store.pending_withdrawals_total(wallet.id).await?;
                if pending > wallet.balance {
                    violations.push(IntegrityViolation::OverCommitted {
                        wallet_id: wallet.id,
                        balance: wallet.balance,
                        pending_withdrawals: pending,
                    });
                }
            }

            if wallets.len() < MAX_PAGE_SIZE as usize {
                break;
            }
            page_number += 1;
        }

        if !violations.is_empty() {
            warn!(count = violations.len(), "Ledger integrity violations found");
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedgerStore;
    use marketpay_common::{StatusChange, Withdrawal, WithdrawalStatus};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn ledger() -> (Arc<InMemoryLedgerStore>, WalletLedger) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = WalletLedger::new(store.clone(), dec!(50));
        (store, ledger)
    }

    fn onboarded() -> AccountCapabilities {
        AccountCapabilities {
            onboarding_completed: true,
            payouts_enabled: true,
            charges_enabled: true,
        }
    }

    #[tokio::test]
    async fn test_available_balance_subtracts_outstanding_withdrawals() {
        let (store, ledger) = ledger();
        let org = OrganizationId::new("org_dev");
        let wallet = ledger.ensure_wallet(&org).await.unwrap();
        ledger.apply_delta(wallet.id, dec!(200)).await.unwrap();

        let withdrawal = Withdrawal::new(wallet.id, org.clone(), dec!(120));
        store.create_withdrawal(&withdrawal).await.unwrap();

        assert_eq!(ledger.available_balance(wallet.id).await.unwrap(), dec!(80));

        store
            .update_withdrawal_status(
                withdrawal.id,
                &StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Rejected),
            )
            .await
            .unwrap();
        assert_eq!(ledger.available_balance(wallet.id).await.unwrap(), dec!(200));
    }

    #[tokio::test]
    async fn test_can_withdraw_needs_flags_and_minimum() {
        let (_store, ledger) = ledger();
        let org = OrganizationId::new("org_dev");
        let wallet = ledger.ensure_wallet(&org).await.unwrap();
        let wallet = ledger.apply_delta(wallet.id, dec!(50)).await.unwrap();

        assert!(!ledger.can_withdraw(&wallet).await.unwrap());

        let wallet = ledger.update_capabilities(wallet.id, onboarded()).await.unwrap();
        assert!(ledger.can_withdraw(&wallet).await.unwrap());

        let wallet = ledger.apply_delta(wallet.id, dec!(-0.01)).await.unwrap();
        assert!(!ledger.can_withdraw(&wallet).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_delta_rejected() {
        let (_store, ledger) = ledger();
        let wallet = ledger
            .ensure_wallet(&OrganizationId::new("org_dev"))
            .await
            .unwrap();
        assert!(matches!(
            ledger.apply_delta(wallet.id, Decimal::ZERO).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_balance_summary_degrades_pending_to_zero() {
        let (store, ledger) = ledger();
        let org = OrganizationId::new("org_dev");
        let wallet = ledger.ensure_wallet(&org).await.unwrap();
        ledger.apply_delta(wallet.id, dec!(75)).await.unwrap();

        store.fail_next(crate::memory::StoreOp::PendingWithdrawalsTotal, 1);
        let summary = ledger.balance_summary(&org).await.unwrap();

        assert_eq!(summary.pending_withdrawals, Decimal::ZERO);
        assert_eq!(summary.available_balance, dec!(75));
        assert!(!summary.can_withdraw);
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let (_store, ledger) = ledger();
        assert!(matches!(
            ledger.wallet(&OrganizationId::new("nobody")).await,
            Err(LedgerError::WalletNotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_balance_tracks_earned_minus_withdrawn(
            cents in proptest::collection::vec(-10_000i64..10_000, 1..40)
        ) {
            let (_store, ledger) = ledger();
            tokio_test::block_on(async {
                let wallet = ledger
                    .ensure_wallet(&OrganizationId::new("org_prop"))
                    .await
                    .unwrap();
                for c in cents.iter().filter(|c| **c != 0) {
                    ledger.apply_delta(wallet.id, Decimal::new(*c, 2)).await.unwrap();
                }
                let violations = ledger.verify_integrity().await.unwrap();
                let unbalanced = violations
                    .iter()
                    .filter(|v| matches!(v, IntegrityViolation::Unbalanced { .. }))
                    .count();
                assert_eq!(unbalanced, 0);
            });
        }
    }
}
