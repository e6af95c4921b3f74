//! Withdrawal request types and the withdrawal lifecycle state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{OrganizationId, PayoutId, WalletId, WithdrawalId};

/// Status of a withdrawal in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Accepted and reserved against the available balance, not yet submitted.
    Pending,
    /// Submitted to the payout provider, outcome not yet known.
    Processing,
    /// Provider accepted the payout and the wallet has been debited.
    Completed,
    /// Provider rejected or later reversed the payout.
    Failed,
    /// Refused before ever reaching the provider.
    Rejected,
}

impl WithdrawalStatus {
    /// Check if this is a final state (no further transitions possible).
    pub fn is_final(&self) -> bool {
        matches!(self, WithdrawalStatus::Failed | WithdrawalStatus::Rejected)
    }

    /// Check if the amount still counts against the wallet's available balance.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, WithdrawalStatus::Pending | WithdrawalStatus::Processing)
    }

    /// Get valid next states from current state.
    ///
    /// `Completed -> Failed` covers a provider reporting a delayed failure for
    /// a payout it had already accepted.
    pub fn valid_transitions(&self) -> &'static [WithdrawalStatus] {
        match self {
            WithdrawalStatus::Pending => &[
                WithdrawalStatus::Processing,
                WithdrawalStatus::Failed,
                WithdrawalStatus::Rejected,
            ],
            WithdrawalStatus::Processing => {
                &[WithdrawalStatus::Completed, WithdrawalStatus::Failed]
            }
            WithdrawalStatus::Completed => &[WithdrawalStatus::Failed],
            WithdrawalStatus::Failed | WithdrawalStatus::Rejected => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: WithdrawalStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawalStatus::Pending),
            "processing" => Some(WithdrawalStatus::Processing),
            "completed" => Some(WithdrawalStatus::Completed),
            "failed" => Some(WithdrawalStatus::Failed),
            "rejected" => Some(WithdrawalStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to move wallet funds out to the organization's provider account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub wallet_id: WalletId,
    pub organization_id: OrganizationId,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    /// Set once the provider has accepted the payout.
    pub payout_id: Option<PayoutId>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Create a new pending withdrawal.
    pub fn new(wallet_id: WalletId, organization_id: OrganizationId, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: WithdrawalId::new(),
            wallet_id,
            organization_id,
            amount,
            status: WithdrawalStatus::Pending,
            payout_id: None,
            failure_reason: None,
            requested_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a status change in place, validating the transition.
    ///
    /// Payout reference and failure reason are only overwritten when the
    /// change carries one, mirroring the store's coalescing update.
    pub fn apply(&mut self, change: &StatusChange) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(change.next) {
            return Err(InvalidTransition {
                from: self.status,
                to: change.next,
            });
        }

        let now = Utc::now();
        self.status = change.next;
        if let Some(payout_id) = &change.payout_id {
            self.payout_id = Some(payout_id.clone());
        }
        if let Some(reason) = &change.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
        if matches!(
            change.next,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Rejected
        ) {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A compare-and-swap status update: applies only if the withdrawal is still
/// in `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub expected: WithdrawalStatus,
    pub next: WithdrawalStatus,
    pub payout_id: Option<PayoutId>,
    pub failure_reason: Option<String>,
}

impl StatusChange {
    pub fn new(expected: WithdrawalStatus, next: WithdrawalStatus) -> Self {
        Self {
            expected,
            next,
            payout_id: None,
            failure_reason: None,
        }
    }

    pub fn with_payout(mut self, payout_id: PayoutId) -> Self {
        self.payout_id = Some(payout_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Result of a compare-and-swap status update.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The update was applied; carries the updated record.
    Applied(Withdrawal),
    /// The withdrawal was no longer in the expected state; nothing changed.
    Conflict { current: WithdrawalStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Error when attempting invalid state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid withdrawal transition from {} to {}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}
