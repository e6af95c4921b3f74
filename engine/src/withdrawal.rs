//! Withdrawal orchestration.
//!
//! A withdrawal is recorded as `pending`, submitted to the payout provider in
//! the background, and resolved either by the submission itself or by a
//! provider webhook. The wallet is debited exactly once, by whichever path
//! wins the `processing -> completed` transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use marketpay_common::{
    round_money, LedgerError, OrganizationId, PayoutId, Result, StatusChange, TransitionOutcome,
    Withdrawal, WithdrawalId, WithdrawalStatus, ESTIMATED_PAYOUT_ARRIVAL,
};
use marketpay_ledger::{LedgerStore, WalletLedger};
use marketpay_payout::{PayoutProvider, PayoutRequest};

use crate::config::{ProviderConfig, WithdrawalConfig};
use crate::metrics::SharedMetrics;
use crate::wallet_locks::WalletLocks;

/// Failure reason recorded when a wallet has no provider account.
pub const NO_PROVIDER_ACCOUNT_REASON: &str = "no provider account linked to wallet";
/// Rejection reason recorded when payouts were disabled after the request.
pub const PAYOUTS_DISABLED_REASON: &str = "payouts disabled for provider account";

/// Most pending withdrawals re-dispatched by one `resume_pending` call.
const RESUME_BATCH_SIZE: u32 = 1000;

/// What the caller gets back when a withdrawal is accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal_id: WithdrawalId,
    pub amount: Decimal,
    /// Reported as `processing`; the stored record converges asynchronously.
    pub status: WithdrawalStatus,
    pub estimated_arrival: &'static str,
    pub requested_at: DateTime<Utc>,
}

/// Drives withdrawals through their lifecycle.
pub struct WithdrawalOrchestrator {
    ledger: Arc<WalletLedger>,
    provider: Arc<dyn PayoutProvider>,
    config: WithdrawalConfig,
    provider_config: ProviderConfig,
    locks: WalletLocks,
    in_flight: DashSet<WithdrawalId>,
    metrics: SharedMetrics,
}

impl WithdrawalOrchestrator {
    pub fn new(
        ledger: Arc<WalletLedger>,
        provider: Arc<dyn PayoutProvider>,
        config: WithdrawalConfig,
        provider_config: ProviderConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            ledger,
            provider,
            config,
            provider_config,
            locks: WalletLocks::new(),
            in_flight: DashSet::new(),
            metrics,
        }
    }

    fn store(&self) -> &Arc<dyn LedgerStore> {
        self.ledger.store()
    }

    /// Accept a withdrawal and dispatch its payout submission.
    #[instrument(skip(self), fields(organization_id = %organization_id, amount = %amount))]
    pub async fn request_withdrawal(
        self: &Arc<Self>,
        organization_id: &OrganizationId,
        amount: Decimal,
    ) -> Result<WithdrawalReceipt> {
        let withdrawal = match self.create_pending(organization_id, amount).await {
            Ok(withdrawal) => withdrawal,
            Err(e) => {
                self.metrics.withdrawal_refused();
                info!(error_code = e.error_code(), error = %e, "Withdrawal refused");
                return Err(e);
            }
        };

        self.metrics.withdrawal_requested();
        info!(
            withdrawal_id = %withdrawal.id,
            wallet_id = %withdrawal.wallet_id,
            "Withdrawal accepted"
        );

        let receipt = WithdrawalReceipt {
            withdrawal_id: withdrawal.id,
            amount: withdrawal.amount,
            status: WithdrawalStatus::Processing,
            estimated_arrival: ESTIMATED_PAYOUT_ARRIVAL,
            requested_at: withdrawal.requested_at,
        };
        self.dispatch(withdrawal);
        Ok(receipt)
    }

    /// Validate a request and persist it as `pending` without submitting it.
    ///
    /// The balance check and the insert run under the wallet's lock.
    pub async fn create_pending(
        &self,
        organization_id: &OrganizationId,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        validate_amount(amount, self.config.minimum_amount)?;

        let wallet = self.ledger.wallet(organization_id).await?;
        if !wallet.capabilities.can_pay_out() {
            return Err(LedgerError::OnboardingIncomplete(wallet.id));
        }

        let _guard = self.locks.lock(wallet.id).await;
        let available = self.ledger.available_balance(wallet.id).await?;
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        let withdrawal = Withdrawal::new(wallet.id, organization_id.clone(), amount);
        self.store().create_withdrawal(&withdrawal).await?;
        Ok(withdrawal)
    }

    /// Spawn the payout submission for a pending withdrawal.
    fn dispatch(self: &Arc<Self>, withdrawal: Withdrawal) {
        if !self.in_flight.insert(withdrawal.id) {
            debug!(withdrawal_id = %withdrawal.id, "Submission already in flight");
            return;
        }
        self.metrics.submission_started();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let withdrawal_id = withdrawal.id;
            if let Err(e) = this.submit(withdrawal).await {
                error!(
                    withdrawal_id = %withdrawal_id,
                    error_code = e.error_code(),
                    error = %e,
                    "Payout submission failed"
                );
            }
            this.in_flight.remove(&withdrawal_id);
            this.metrics.submission_finished();
        });
    }

    /// Submit a pending withdrawal to the provider and record the outcome.
    ///
    /// Returns the withdrawal as last seen. A provider timeout leaves it in
    /// `processing` for the webhook to resolve.
    #[instrument(skip(self, withdrawal), fields(withdrawal_id = %withdrawal.id))]
    pub async fn submit(&self, withdrawal: Withdrawal) -> Result<Withdrawal> {
        let wallet = self
            .store()
            .get_wallet_by_id(withdrawal.wallet_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(withdrawal.wallet_id.to_string()))?;

        let Some(account_id) = wallet.provider_account_id.clone() else {
            warn!(wallet_id = %wallet.id, "No provider account, failing withdrawal");
            let change = StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Failed)
                .with_reason(NO_PROVIDER_ACCOUNT_REASON);
            return self.transition(&withdrawal, change).await;
        };

        if !wallet.capabilities.can_pay_out() {
            warn!(wallet_id = %wallet.id, "Payouts disabled since request, rejecting withdrawal");
            let change = StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Rejected)
                .with_reason(PAYOUTS_DISABLED_REASON);
            return self.transition(&withdrawal, change).await;
        }

        let claim = StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Processing);
        let withdrawal = match self.store().update_withdrawal_status(withdrawal.id, &claim).await? {
            TransitionOutcome::Applied(w) => w,
            TransitionOutcome::Conflict { current } => {
                debug!(status = %current, "Withdrawal already left pending");
                return self.current(withdrawal.id).await;
            }
        };

        let request = match PayoutRequest::for_withdrawal(
            &withdrawal,
            account_id,
            self.config.payout_currency.clone(),
        ) {
            Ok(request) => request,
            Err(e) => {
                self.fail_outstanding(&withdrawal, &e.to_string()).await?;
                return self.current(withdrawal.id).await;
            }
        };

        let call = self.provider.create_payout(&request);
        match tokio::time::timeout(self.provider_config.call_timeout, call).await {
            Ok(Ok(payout_id)) => {
                info!(payout_id = %payout_id, amount_minor = request.amount_minor, "Payout created");
                self.complete(&withdrawal, Some(payout_id)).await?;
            }
            Ok(Err(e)) if e.is_timeout() => {
                self.metrics.provider_timeout();
                warn!(error = %e, "Provider timed out, leaving withdrawal processing");
            }
            Err(_) => {
                self.metrics.provider_timeout();
                warn!(
                    timeout_ms = self.provider_config.call_timeout.as_millis() as u64,
                    "Provider call exceeded timeout, leaving withdrawal processing"
                );
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Provider rejected payout");
                self.fail_outstanding(&withdrawal, &e.to_string()).await?;
            }
        }

        self.current(withdrawal.id).await
    }

    /// `processing -> completed`, debiting the wallet if this call won the
    /// transition.
    #[instrument(skip(self, withdrawal), fields(withdrawal_id = %withdrawal.id))]
    pub async fn complete(
        &self,
        withdrawal: &Withdrawal,
        payout_id: Option<PayoutId>,
    ) -> Result<TransitionOutcome> {
        let mut change = StatusChange::new(WithdrawalStatus::Processing, WithdrawalStatus::Completed);
        if let Some(payout_id) = payout_id {
            change = change.with_payout(payout_id);
        }

        let _guard = self.locks.lock(withdrawal.wallet_id).await;
        let outcome = self
            .store()
            .update_withdrawal_status(withdrawal.id, &change)
            .await?;

        if let TransitionOutcome::Applied(completed) = &outcome {
            if let Err(e) = self
                .ledger
                .apply_delta(completed.wallet_id, -completed.amount)
                .await
            {
                error!(
                    wallet_id = %completed.wallet_id,
                    amount = %completed.amount,
                    error = %e,
                    "Withdrawal completed but wallet debit failed"
                );
                return Err(LedgerError::WithdrawalInconsistent {
                    withdrawal_id: completed.id,
                    reason: e.to_string(),
                });
            }
            self.metrics.withdrawal_completed();
            info!(
                wallet_id = %completed.wallet_id,
                amount = %completed.amount,
                "Withdrawal completed"
            );
        }
        Ok(outcome)
    }

    /// `pending | processing -> failed`. Nothing was debited, so the balance
    /// is untouched.
    #[instrument(skip(self, withdrawal), fields(withdrawal_id = %withdrawal.id))]
    pub async fn fail_outstanding(
        &self,
        withdrawal: &Withdrawal,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        if !withdrawal.status.is_outstanding() {
            return Err(LedgerError::UnexpectedState {
                withdrawal_id: withdrawal.id,
                status: withdrawal.status,
            });
        }
        let change = StatusChange::new(withdrawal.status, WithdrawalStatus::Failed).with_reason(reason);
        let outcome = self
            .store()
            .update_withdrawal_status(withdrawal.id, &change)
            .await?;
        if outcome.is_applied() {
            self.metrics.withdrawal_failed();
            warn!(reason, "Withdrawal failed");
        }
        Ok(outcome)
    }

    /// `completed -> failed`, crediting the amount back if this call won the
    /// transition.
    #[instrument(skip(self, withdrawal), fields(withdrawal_id = %withdrawal.id))]
    pub async fn reverse_completed(
        &self,
        withdrawal: &Withdrawal,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let change =
            StatusChange::new(WithdrawalStatus::Completed, WithdrawalStatus::Failed).with_reason(reason);
        let outcome = self
            .store()
            .update_withdrawal_status(withdrawal.id, &change)
            .await?;

        if let TransitionOutcome::Applied(failed) = &outcome {
            if let Err(e) = self.ledger.apply_delta(failed.wallet_id, failed.amount).await {
                error!(
                    wallet_id = %failed.wallet_id,
                    amount = %failed.amount,
                    error = %e,
                    "Payout reversed but wallet credit failed"
                );
                return Err(LedgerError::WithdrawalInconsistent {
                    withdrawal_id: failed.id,
                    reason: e.to_string(),
                });
            }
            self.metrics.withdrawal_failed();
            self.metrics.withdrawal_reversed();
            warn!(
                wallet_id = %failed.wallet_id,
                amount = %failed.amount,
                reason,
                "Completed withdrawal reversed, amount credited back"
            );
        }
        Ok(outcome)
    }

    /// Re-dispatch withdrawals that were accepted but never submitted.
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize> {
        let pending = self
            .store()
            .list_withdrawals_by_status(WithdrawalStatus::Pending, RESUME_BATCH_SIZE)
            .await?;

        let mut dispatched = 0;
        for withdrawal in pending {
            if self.in_flight.contains(&withdrawal.id) {
                continue;
            }
            self.dispatch(withdrawal);
            dispatched += 1;
        }
        if dispatched > 0 {
            info!(dispatched, "Resumed pending withdrawals");
        }
        Ok(dispatched)
    }

    /// Number of submissions currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait for in-flight submissions to finish. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let in_flight = self.in_flight_count();
                if in_flight == 0 {
                    break;
                }
                debug!(in_flight, "Waiting for payout submissions to finish");
                tokio::time::sleep(self.config.drain_poll_interval).await;
            }
        })
        .await
        .is_ok()
    }

    async fn transition(&self, withdrawal: &Withdrawal, change: StatusChange) -> Result<Withdrawal> {
        let next = change.next;
        match self.store().update_withdrawal_status(withdrawal.id, &change).await? {
            TransitionOutcome::Applied(updated) => {
                match next {
                    WithdrawalStatus::Rejected => self.metrics.withdrawal_rejected(),
                    WithdrawalStatus::Failed => self.metrics.withdrawal_failed(),
                    _ => {}
                }
                Ok(updated)
            }
            TransitionOutcome::Conflict { .. } => self.current(withdrawal.id).await,
        }
    }

    async fn current(&self, id: WithdrawalId) -> Result<Withdrawal> {
        self.store()
            .get_withdrawal(id)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(id))
    }
}

fn validate_amount(amount: Decimal, minimum: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(
            "withdrawal amount must be positive".into(),
        ));
    }
    if round_money(amount) != amount {
        return Err(LedgerError::InvalidAmount(
            "withdrawal amount has more than two decimal places".into(),
        ));
    }
    if amount < minimum {
        return Err(LedgerError::BelowMinimum { amount, minimum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use marketpay_common::{AccountCapabilities, ErrorKind};
    use marketpay_payout::ProviderError;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_minimum_withdrawal_boundary() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(50.00)).await;
        let org = wallet.organization_id.clone();

        let err = h.withdrawals.create_pending(&org, dec!(49.99)).await.unwrap_err();
        assert!(matches!(err, LedgerError::BelowMinimum { .. }));
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        h.withdrawals.create_pending(&org, dec!(50.00)).await.unwrap();
        assert_eq!(h.ledger.available_balance(wallet.id).await.unwrap(), dec!(0.00));
    }

    #[tokio::test]
    async fn test_amount_validation() {
        let h = Harness::new();
        let org = h.onboarded_wallet("org_dev", dec!(500)).await.organization_id;

        for amount in [dec!(0), dec!(-60), dec!(60.001)] {
            assert!(matches!(
                h.withdrawals.create_pending(&org, amount).await,
                Err(LedgerError::InvalidAmount(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_request_preconditions() {
        let h = Harness::new();
        assert!(matches!(
            h.withdrawals
                .create_pending(&OrganizationId::new("nobody"), dec!(60))
                .await,
            Err(LedgerError::WalletNotFound(_))
        ));

        let org = OrganizationId::new("org_new");
        let wallet = h.ledger.ensure_wallet(&org).await.unwrap();
        h.ledger.apply_delta(wallet.id, dec!(100)).await.unwrap();
        assert!(matches!(
            h.withdrawals.create_pending(&org, dec!(60)).await,
            Err(LedgerError::OnboardingIncomplete(_))
        ));

        let org = h.onboarded_wallet("org_dev", dec!(100)).await.organization_id;
        h.withdrawals.create_pending(&org, dec!(60)).await.unwrap();
        let err = h.withdrawals.create_pending(&org, dec!(60)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                requested: dec!(60),
                available: dec!(40),
            }
        );
    }

    #[tokio::test]
    async fn test_deducts_once_at_completion() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(200)).await;

        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(80))
            .await
            .unwrap();
        assert_eq!(h.wallet("org_dev").await.balance, dec!(200));

        let done = h.withdrawals.submit(pending.clone()).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        assert!(done.payout_id.is_some());
        assert!(done.completed_at.is_some());

        let after = h.wallet("org_dev").await;
        assert_eq!(after.balance, dec!(120));
        assert_eq!(after.total_withdrawn, dec!(80));
        assert!(after.is_balanced());

        // A second submission of the same record changes nothing.
        let again = h.withdrawals.submit(pending).await.unwrap();
        assert_eq!(again.status, WithdrawalStatus::Completed);
        assert_eq!(h.wallet("org_dev").await.balance, dec!(120));
        assert_eq!(h.provider.payout_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_rejection_fails_without_balance_change() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        h.provider.fail_next_payout(ProviderError::Rejected {
            code: "insufficient_platform_balance".into(),
            message: "Platform balance too low".into(),
        });

        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(75))
            .await
            .unwrap();
        let failed = h.withdrawals.submit(pending).await.unwrap();

        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert!(failed
            .failure_reason
            .unwrap()
            .contains("insufficient_platform_balance"));
        assert_eq!(h.wallet("org_dev").await.balance, dec!(100));
        assert_eq!(h.ledger.available_balance(wallet.id).await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn test_provider_timeout_leaves_processing() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        h.provider
            .set_payout_delay(Some(Duration::from_millis(500)));

        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(60))
            .await
            .unwrap();
        let stuck = h.withdrawals.submit(pending).await.unwrap();

        assert_eq!(stuck.status, WithdrawalStatus::Processing);
        assert_eq!(h.wallet("org_dev").await.balance, dec!(100));
        assert_eq!(h.ledger.available_balance(wallet.id).await.unwrap(), dec!(40));
        assert_eq!(h.metrics.snapshot().provider_timeouts, 1);
    }

    #[tokio::test]
    async fn test_missing_provider_account_fails() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(60))
            .await
            .unwrap();

        // Simulate a wallet whose provider link was never stored.
        let orphan = Withdrawal::new(
            h.ledger
                .ensure_wallet(&OrganizationId::new("org_orphan"))
                .await
                .unwrap()
                .id,
            OrganizationId::new("org_orphan"),
            dec!(60),
        );
        h.store.create_withdrawal(&orphan).await.unwrap();

        let failed = h.withdrawals.submit(orphan).await.unwrap();
        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some(NO_PROVIDER_ACCOUNT_REASON));

        let done = h.withdrawals.submit(pending).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
    }

    #[tokio::test]
    async fn test_capability_lost_rejects() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(60))
            .await
            .unwrap();

        h.ledger
            .update_capabilities(
                wallet.id,
                AccountCapabilities {
                    onboarding_completed: true,
                    payouts_enabled: false,
                    charges_enabled: true,
                },
            )
            .await
            .unwrap();

        let rejected = h.withdrawals.submit(pending).await.unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(h.provider.payout_count(), 0);
        assert_eq!(h.ledger.available_balance(wallet.id).await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn test_request_returns_processing_and_converges() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(150)).await;

        let receipt = h
            .withdrawals
            .request_withdrawal(&wallet.organization_id, dec!(100))
            .await
            .unwrap();
        assert_eq!(receipt.status, WithdrawalStatus::Processing);
        assert_eq!(receipt.estimated_arrival, ESTIMATED_PAYOUT_ARRIVAL);

        h.wait_for_status(receipt.withdrawal_id, WithdrawalStatus::Completed)
            .await;
        assert!(h.withdrawals.drain(Duration::from_secs(1)).await);
        assert_eq!(h.wallet("org_dev").await.balance, dec!(50));
        assert_eq!(h.metrics.snapshot().submissions_in_flight, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_cannot_overcommit() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        h.provider
            .set_payout_delay(Some(Duration::from_millis(20)));
        let org = wallet.organization_id.clone();

        let (a, b) = tokio::join!(
            h.withdrawals.request_withdrawal(&org, dec!(60)),
            h.withdrawals.request_withdrawal(&org, dec!(60)),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. }))));

        assert!(h.withdrawals.drain(Duration::from_secs(1)).await);
        let after = h.wallet("org_dev").await;
        assert_eq!(after.balance, dec!(40));
        assert!(after.is_balanced());
    }

    #[tokio::test]
    async fn test_resume_pending_dispatches_unsubmitted() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(200)).await;
        let first = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(60))
            .await
            .unwrap();
        let second = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(70))
            .await
            .unwrap();

        assert_eq!(h.withdrawals.resume_pending().await.unwrap(), 2);
        h.wait_for_status(first.id, WithdrawalStatus::Completed).await;
        h.wait_for_status(second.id, WithdrawalStatus::Completed).await;
        assert!(h.withdrawals.drain(Duration::from_secs(1)).await);

        assert_eq!(h.wallet("org_dev").await.balance, dec!(70));
        assert_eq!(h.withdrawals.resume_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reverse_completed_credits_once() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(100))
            .await
            .unwrap();
        let done = h.withdrawals.submit(pending).await.unwrap();
        assert_eq!(h.wallet("org_dev").await.balance, dec!(0));

        let first = h
            .withdrawals
            .reverse_completed(&done, "account_closed: closed")
            .await
            .unwrap();
        let second = h
            .withdrawals
            .reverse_completed(&done, "account_closed: closed")
            .await
            .unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        let after = h.wallet("org_dev").await;
        assert_eq!(after.balance, dec!(100));
        assert!(after.is_balanced());
        assert_eq!(h.metrics.snapshot().withdrawals_reversed, 1);
    }

    #[tokio::test]
    async fn test_debit_failure_is_reported_inconsistent() {
        let h = Harness::new();
        let wallet = h.onboarded_wallet("org_dev", dec!(100)).await;
        let pending = h
            .withdrawals
            .create_pending(&wallet.organization_id, dec!(60))
            .await
            .unwrap();

        h.store
            .fail_next(marketpay_ledger::StoreOp::ApplyBalanceDelta, 1);
        let err = h.withdrawals.submit(pending).await.unwrap_err();
        assert!(matches!(err, LedgerError::WithdrawalInconsistent { .. }));
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
    }
}
