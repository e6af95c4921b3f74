//! Balance summaries and integrity reports.

use marketpay_common::{OrganizationId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time view of a wallet's money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub wallet_id: WalletId,
    pub organization_id: OrganizationId,
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    /// Sum of withdrawals still pending or processing.
    pub pending_withdrawals: Decimal,
    pub available_balance: Decimal,
    pub can_withdraw: bool,
    pub minimum_withdrawal: Decimal,
}

/// A wallet found violating a ledger invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntegrityViolation {
    /// `balance != total_earned - total_withdrawn`.
    Unbalanced {
        wallet_id: WalletId,
        balance: Decimal,
        total_earned: Decimal,
        total_withdrawn: Decimal,
    },
    /// Outstanding withdrawals exceed the balance.
    OverCommitted {
        wallet_id: WalletId,
        balance: Decimal,
        pending_withdrawals: Decimal,
    },
}

impl IntegrityViolation {
    pub fn wallet_id(&self) -> WalletId {
        match self {
            IntegrityViolation::Unbalanced { wallet_id, .. }
            | IntegrityViolation::OverCommitted { wallet_id, .. } => *wallet_id,
        }
    }
}
