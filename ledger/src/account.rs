//! Wallet and payer account records.

use chrono::{DateTime, Utc};
use marketpay_common::{
    AccountCapabilities, OrganizationId, PayerAccountId, ProviderAccountId, WalletId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A developer organization's earnings wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    /// Owning organization (unique across wallets).
    pub organization_id: OrganizationId,
    /// Connected account at the payout provider, once onboarding has started.
    pub provider_account_id: Option<ProviderAccountId>,
    /// Last onboarding link handed out.
    pub onboarding_url: Option<String>,
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub capabilities: AccountCapabilities,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for an organization.
    pub fn new(organization_id: OrganizationId) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            organization_id,
            provider_account_id: None,
            onboarding_url: None,
            balance: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            capabilities: AccountCapabilities::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `balance == total_earned - total_withdrawn`.
    pub fn is_balanced(&self) -> bool {
        self.balance == self.total_earned - self.total_withdrawn
    }

    /// Apply a signed balance delta with earned/withdrawn bookkeeping.
    ///
    /// Only storage backends call this, while holding the wallet exclusively.
    pub(crate) fn apply_delta(&mut self, amount: Decimal) {
        self.balance += amount;
        if amount.is_sign_positive() {
            self.total_earned += amount;
        } else {
            self.total_withdrawn += amount.abs();
        }
        self.updated_at = Utc::now();
    }
}

/// A paying organization's funding account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerAccount {
    pub id: PayerAccountId,
    pub organization_id: OrganizationId,
    /// Never negative; decrements are conditional on sufficiency.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayerAccount {
    pub fn new(organization_id: OrganizationId, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: PayerAccountId::new(),
            organization_id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}
