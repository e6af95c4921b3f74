//! Storage interface for wallets, withdrawals, transactions and payer accounts.

use async_trait::async_trait;
use marketpay_common::{
    AccountCapabilities, OrganizationId, PayerAccountId, ProviderAccountId, Result, StatusChange, TransitionOutcome,
    WalletId, Withdrawal, WithdrawalId, WithdrawalStatus,
};
use rust_decimal::Decimal;

use crate::account::{PayerAccount, Wallet};
use crate::journal::FunctionExecutionTransaction;

/// Default page size for history queries.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Limit/offset pagination. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Build a page from optional caller input, applying defaults and caps.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        Self {
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(Some(1), Some(limit))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Which side of a payment to list transactions for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFilter {
    /// Payments received by this organization's wallet.
    Payee(OrganizationId),
    /// Payments made by this organization.
    Payer(OrganizationId),
}

/// Durable storage used by the ledger.
///
/// Implementations must make `apply_balance_delta`, `deduct_payer_balance`
/// and `update_withdrawal_status` single atomic operations: callers never
/// read a value, compute, and write it back.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up the wallet owned by an organization.
    async fn get_wallet(&self, organization_id: &OrganizationId) -> Result<Option<Wallet>>;

    async fn get_wallet_by_id(&self, wallet_id: WalletId) -> Result<Option<Wallet>>;

    /// Create the organization's wallet, or return the existing one.
    async fn create_wallet(&self, organization_id: &OrganizationId) -> Result<Wallet>;

    /// All wallets, newest first.
    async fn list_wallets(&self, page: Page) -> Result<Vec<Wallet>>;

    /// Wallets that have received at least one payment from `payer`.
    async fn list_wallets_paid_by(
        &self,
        payer: &OrganizationId,
        page: Page,
    ) -> Result<Vec<Wallet>>;

    async fn set_provider_account(
        &self,
        wallet_id: WalletId,
        account_id: &ProviderAccountId,
        onboarding_url: Option<&str>,
    ) -> Result<Wallet>;

    /// Overwrite the capability flags with provider-reported values.
    async fn update_capabilities(
        &self,
        wallet_id: WalletId,
        capabilities: AccountCapabilities,
    ) -> Result<Wallet>;

    /// Atomically add a signed delta to the balance, crediting `total_earned`
    /// for positive deltas and `total_withdrawn` for negative ones.
    async fn apply_balance_delta(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet>;

    /// Live sum of withdrawals in `pending` or `processing`.
    async fn pending_withdrawals_total(&self, wallet_id: WalletId) -> Result<Decimal>;

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()>;

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>>;

    /// Compare-and-swap a withdrawal's status.
    ///
    /// Returns `Conflict` without side effects if the withdrawal is no longer
    /// in `change.expected`.
    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        change: &StatusChange,
    ) -> Result<TransitionOutcome>;

    /// A wallet's withdrawals, newest first.
    async fn list_withdrawals(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Withdrawal>>;

    /// Withdrawals currently in `status`, oldest first.
    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: u32,
    ) -> Result<Vec<Withdrawal>>;

    async fn create_transaction(&self, transaction: &FunctionExecutionTransaction) -> Result<()>;

    /// Transactions for one side of a payment, newest first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Vec<FunctionExecutionTransaction>>;

    async fn get_payer_account(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<PayerAccount>>;

    /// Open a funding account for an organization, or return the existing one.
    async fn create_payer_account(
        &self,
        organization_id: &OrganizationId,
        opening_balance: Decimal,
    ) -> Result<PayerAccount>;

    /// Atomically decrement a payer balance, failing with `InsufficientFunds`
    /// if it would go negative.
    async fn deduct_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount>;

    /// Atomically increment a payer balance.
    async fn credit_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults() {
        let page = Page::default();
        assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset, 0);
    }

    #[test]
    fn test_page_caps_limit_and_computes_offset() {
        let page = Page::new(Some(3), Some(500));
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.offset, 200);

        let page = Page::new(Some(0), Some(0));
        assert_eq!(page, Page::default());
    }
}
