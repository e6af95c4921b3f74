//! Webhook reconciliation.
//!
//! Provider events are delivered at least once and in any order. Each
//! handler reads the withdrawal's current status and applies the transition
//! that event implies, so replays and reorderings converge on the same
//! ledger state.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use marketpay_common::{
    AccountCapabilities, LedgerError, OrganizationId, PayoutId, ProviderAccountId, Result,
    TransitionOutcome, Withdrawal, WithdrawalId, WithdrawalStatus,
};
use marketpay_crypto::{sha256_hex, WebhookVerifier};
use marketpay_ledger::{LedgerStore, WalletLedger};
use marketpay_payout::{EventKind, WebhookEvent};

use crate::config::WebhookConfig;
use crate::metrics::SharedMetrics;
use crate::withdrawal::WithdrawalOrchestrator;

/// How many times a handler re-reads a withdrawal after losing a
/// compare-and-swap to a concurrent update.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Response to a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    /// HTTP status to return to the provider.
    pub status: u16,
    pub message: String,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self {
            status: 200,
            message: "received".to_string(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Applies provider events to the ledger.
pub struct WebhookReconciler {
    verifier: WebhookVerifier,
    ledger: Arc<WalletLedger>,
    withdrawals: Arc<WithdrawalOrchestrator>,
    metrics: SharedMetrics,
}

impl WebhookReconciler {
    pub fn new(
        config: &WebhookConfig,
        ledger: Arc<WalletLedger>,
        withdrawals: Arc<WithdrawalOrchestrator>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let verifier = WebhookVerifier::new(&config.secret, config.signature_tolerance)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?;
        Ok(Self {
            verifier,
            ledger,
            withdrawals,
            metrics,
        })
    }

    /// Authenticate and apply one delivery.
    ///
    /// Only authentication failures produce a non-200 ack; handler errors
    /// are logged and acknowledged.
    #[instrument(skip_all, fields(payload_sha256 = %sha256_hex(payload)))]
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> WebhookAck {
        self.metrics.webhook_received();

        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            self.metrics.webhook_rejected();
            warn!("Webhook missing signature header");
            return WebhookAck::rejected("missing signature header");
        };

        if let Err(e) = self.verifier.verify(payload, signature) {
            self.metrics.webhook_rejected();
            warn!(error = %e, "Webhook signature verification failed");
            return WebhookAck::rejected("invalid signature");
        }

        if let Err(e) = self.process(payload).await {
            self.metrics.webhook_error();
            error!(error_code = e.error_code(), error = %e, "Webhook handler failed");
        }
        WebhookAck::received()
    }

    /// Apply an already-authenticated payload.
    pub async fn process(&self, payload: &[u8]) -> Result<()> {
        let event = WebhookEvent::parse(payload)?;
        info!(event_id = %event.id, event_type = %event.event_type, "Webhook event received");

        match event.kind {
            EventKind::AccountUpdated {
                account_id,
                organization_id,
                capabilities,
            } => {
                self.account_updated(&account_id, organization_id, capabilities)
                    .await
            }
            EventKind::PayoutPaid {
                payout_id,
                withdrawal_id,
            } => match withdrawal_id {
                Some(id) => self.payout_paid(id, payout_id).await,
                None => {
                    warn!(payout_id = %payout_id, "payout.paid without withdrawal_id, ignoring");
                    Ok(())
                }
            },
            EventKind::PayoutFailed {
                payout_id,
                withdrawal_id,
                reason,
            } => match withdrawal_id {
                Some(id) => self.payout_failed(id, &reason).await,
                None => {
                    warn!(payout_id = %payout_id, "payout.failed without withdrawal_id, ignoring");
                    Ok(())
                }
            },
            EventKind::Unknown => {
                debug!(event_type = %event.event_type, "Unhandled webhook event type");
                Ok(())
            }
        }
    }

    /// Overwrite wallet capability flags with what the provider reports.
    /// Events for an account other than the wallet's linked one are dropped.
    #[instrument(skip(self, capabilities), fields(account_id = %account_id))]
    async fn account_updated(
        &self,
        account_id: &ProviderAccountId,
        organization_id: Option<OrganizationId>,
        capabilities: AccountCapabilities,
    ) -> Result<()> {
        let Some(organization_id) = organization_id else {
            warn!("account.updated without organization_id metadata, ignoring");
            return Ok(());
        };
        let Some(wallet) = self.ledger.store().get_wallet(&organization_id).await? else {
            warn!(organization_id = %organization_id, "account.updated for unknown organization, ignoring");
            return Ok(());
        };
        if wallet.provider_account_id.as_ref() != Some(account_id) {
            warn!(
                wallet_id = %wallet.id,
                linked_account = ?wallet.provider_account_id,
                "account.updated for an account not linked to this wallet, ignoring"
            );
            return Ok(());
        }
        self.ledger.update_capabilities(wallet.id, capabilities).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(withdrawal_id = %withdrawal_id, payout_id = %payout_id))]
    async fn payout_paid(&self, withdrawal_id: WithdrawalId, payout_id: PayoutId) -> Result<()> {
        let mut status = WithdrawalStatus::Pending;
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let withdrawal = self.load(withdrawal_id).await?;
            status = withdrawal.status;
            match status {
                WithdrawalStatus::Completed => {
                    debug!("Withdrawal already completed");
                    return Ok(());
                }
                WithdrawalStatus::Failed => {
                    warn!("payout.paid for a failed withdrawal, ignoring");
                    return Ok(());
                }
                WithdrawalStatus::Pending | WithdrawalStatus::Rejected => {
                    return Err(LedgerError::UnexpectedState {
                        withdrawal_id,
                        status,
                    });
                }
                WithdrawalStatus::Processing => {
                    if let TransitionOutcome::Applied(_) = self
                        .withdrawals
                        .complete(&withdrawal, Some(payout_id.clone()))
                        .await?
                    {
                        return Ok(());
                    }
                }
            }
        }
        Err(LedgerError::UnexpectedState {
            withdrawal_id,
            status,
        })
    }

    #[instrument(skip(self), fields(withdrawal_id = %withdrawal_id))]
    async fn payout_failed(&self, withdrawal_id: WithdrawalId, reason: &str) -> Result<()> {
        let mut status = WithdrawalStatus::Pending;
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let withdrawal = self.load(withdrawal_id).await?;
            status = withdrawal.status;
            let outcome = match status {
                WithdrawalStatus::Failed => {
                    debug!("Withdrawal already failed");
                    return Ok(());
                }
                WithdrawalStatus::Rejected => {
                    return Err(LedgerError::UnexpectedState {
                        withdrawal_id,
                        status,
                    });
                }
                WithdrawalStatus::Completed => {
                    self.withdrawals.reverse_completed(&withdrawal, reason).await?
                }
                WithdrawalStatus::Pending | WithdrawalStatus::Processing => {
                    self.withdrawals.fail_outstanding(&withdrawal, reason).await?
                }
            };
            if outcome.is_applied() {
                return Ok(());
            }
        }
        Err(LedgerError::UnexpectedState {
            withdrawal_id,
            status,
        })
    }

    async fn load(&self, id: WithdrawalId) -> Result<Withdrawal> {
        self.ledger
            .store()
            .get_withdrawal(id)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(id))
    }
}
