//! In-memory ledger store.
//!
//! Each record lives in a `DashMap` entry; mutations happen while holding that
//! entry's shard lock, which gives the same atomicity the relational backend
//! gets from single conditional `UPDATE` statements. Guards are never held
//! across an `.await`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use marketpay_common::{
    AccountCapabilities, LedgerError, OrganizationId, PayerAccountId, ProviderAccountId, Result, StatusChange,
    TransactionId, TransitionOutcome, WalletId, Withdrawal, WithdrawalId, WithdrawalStatus,
};

use crate::account::{PayerAccount, Wallet};
use crate::journal::FunctionExecutionTransaction;
use crate::store::{LedgerStore, Page, TransactionFilter};

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ApplyBalanceDelta,
    PendingWithdrawalsTotal,
    UpdateWithdrawalStatus,
    CreateTransaction,
    DeductPayerBalance,
    CreditPayerBalance,
}

/// `LedgerStore` backed by concurrent hash maps.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    wallets: DashMap<WalletId, Wallet>,
    wallets_by_org: DashMap<OrganizationId, WalletId>,
    withdrawals: DashMap<WithdrawalId, Withdrawal>,
    transactions: DashMap<TransactionId, FunctionExecutionTransaction>,
    payer_accounts: DashMap<PayerAccountId, PayerAccount>,
    payers_by_org: DashMap<OrganizationId, PayerAccountId>,
    faults: Mutex<HashMap<StoreOp, u32>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with a storage error.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        *self.faults.lock().entry(op).or_insert(0) += times;
    }

    /// Snapshot of every wallet.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.wallets.iter().map(|w| w.value().clone()).collect()
    }

    /// Snapshot of every withdrawal.
    pub fn withdrawals(&self) -> Vec<Withdrawal> {
        self.withdrawals.iter().map(|w| w.value().clone()).collect()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn check_fault(&self, op: StoreOp) -> Result<()> {
        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(?op, "Injected store failure");
                return Err(LedgerError::Storage(format!("injected failure: {op:?}")));
            }
        }
        Ok(())
    }

    fn wallet_mut(
        &self,
        wallet_id: WalletId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, WalletId, Wallet>> {
        self.wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
    }

    fn payer_mut(
        &self,
        account_id: PayerAccountId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, PayerAccountId, PayerAccount>> {
        self.payer_accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::PayerNotFound(account_id.to_string()))
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_wallet(&self, organization_id: &OrganizationId) -> Result<Option<Wallet>> {
        let Some(wallet_id) = self.wallets_by_org.get(organization_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.wallets.get(&wallet_id).map(|w| w.clone()))
    }

    async fn get_wallet_by_id(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.wallets.get(&wallet_id).map(|w| w.clone()))
    }

    async fn create_wallet(&self, organization_id: &OrganizationId) -> Result<Wallet> {
        match self.wallets_by_org.entry(organization_id.clone()) {
            Entry::Occupied(entry) => {
                let wallet_id = *entry.get();
                drop(entry);
                self.wallets
                    .get(&wallet_id)
                    .map(|w| w.clone())
                    .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
            }
            Entry::Vacant(entry) => {
                let wallet = Wallet::new(organization_id.clone());
                self.wallets.insert(wallet.id, wallet.clone());
                entry.insert(wallet.id);
                Ok(wallet)
            }
        }
    }

    async fn list_wallets(&self, page: Page) -> Result<Vec<Wallet>> {
        let mut wallets = self.wallets();
        wallets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(wallets, page))
    }

    async fn list_wallets_paid_by(
        &self,
        payer: &OrganizationId,
        page: Page,
    ) -> Result<Vec<Wallet>> {
        let payee_ids: HashSet<WalletId> = self
            .transactions
            .iter()
            .filter(|tx| &tx.payer_organization_id == payer)
            .map(|tx| tx.payee_wallet_id)
            .collect();

        let mut wallets: Vec<Wallet> = payee_ids
            .into_iter()
            .filter_map(|id| self.wallets.get(&id).map(|w| w.clone()))
            .collect();
        wallets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(wallets, page))
    }

    async fn set_provider_account(
        &self,
        wallet_id: WalletId,
        account_id: &ProviderAccountId,
        onboarding_url: Option<&str>,
    ) -> Result<Wallet> {
        let mut wallet = self.wallet_mut(wallet_id)?;
        wallet.provider_account_id = Some(account_id.clone());
        if let Some(url) = onboarding_url {
            wallet.onboarding_url = Some(url.to_string());
        }
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn update_capabilities(
        &self,
        wallet_id: WalletId,
        capabilities: AccountCapabilities,
    ) -> Result<Wallet> {
        let mut wallet = self.wallet_mut(wallet_id)?;
        wallet.capabilities = capabilities;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn apply_balance_delta(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet> {
        self.check_fault(StoreOp::ApplyBalanceDelta)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("balance delta must be non-zero".into()));
        }
        let mut wallet = self.wallet_mut(wallet_id)?;
        wallet.apply_delta(amount);
        Ok(wallet.clone())
    }

    async fn pending_withdrawals_total(&self, wallet_id: WalletId) -> Result<Decimal> {
        self.check_fault(StoreOp::PendingWithdrawalsTotal)?;
        Ok(self
            .withdrawals
            .iter()
            .filter(|w| w.wallet_id == wallet_id && w.status.is_outstanding())
            .map(|w| w.amount)
            .sum())
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        require_positive(withdrawal.amount)?;
        if !self.wallets.contains_key(&withdrawal.wallet_id) {
            return Err(LedgerError::WalletNotFound(withdrawal.wallet_id.to_string()));
        }
        match self.withdrawals.entry(withdrawal.id) {
            Entry::Occupied(_) => Err(LedgerError::Storage(format!(
                "withdrawal {} already exists",
                withdrawal.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(withdrawal.clone());
                Ok(())
            }
        }
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        Ok(self.withdrawals.get(&id).map(|w| w.clone()))
    }

    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        change: &StatusChange,
    ) -> Result<TransitionOutcome> {
        self.check_fault(StoreOp::UpdateWithdrawalStatus)?;
        if !change.expected.can_transition_to(change.next) {
            return Err(LedgerError::InvalidTransition {
                from: change.expected,
                to: change.next,
            });
        }

        let mut withdrawal = self
            .withdrawals
            .get_mut(&id)
            .ok_or(LedgerError::WithdrawalNotFound(id))?;

        if withdrawal.status != change.expected {
            return Ok(TransitionOutcome::Conflict {
                current: withdrawal.status,
            });
        }

        withdrawal.apply(change)?;
        Ok(TransitionOutcome::Applied(withdrawal.clone()))
    }

    async fn list_withdrawals(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Withdrawal>> {
        let mut withdrawals: Vec<Withdrawal> = self
            .withdrawals
            .iter()
            .filter(|w| w.wallet_id == wallet_id)
            .map(|w| w.clone())
            .collect();
        withdrawals.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(paginate(withdrawals, page))
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: u32,
    ) -> Result<Vec<Withdrawal>> {
        let mut withdrawals: Vec<Withdrawal> = self
            .withdrawals
            .iter()
            .filter(|w| w.status == status)
            .map(|w| w.clone())
            .collect();
        withdrawals.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        withdrawals.truncate(limit as usize);
        Ok(withdrawals)
    }

    async fn create_transaction(&self, transaction: &FunctionExecutionTransaction) -> Result<()> {
        self.check_fault(StoreOp::CreateTransaction)?;
        match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => Err(LedgerError::Storage(format!(
                "transaction {} already exists",
                transaction.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(transaction.clone());
                Ok(())
            }
        }
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Vec<FunctionExecutionTransaction>> {
        let mut transactions: Vec<FunctionExecutionTransaction> = self
            .transactions
            .iter()
            .filter(|tx| match filter {
                TransactionFilter::Payee(org) => &tx.payee_organization_id == org,
                TransactionFilter::Payer(org) => &tx.payer_organization_id == org,
            })
            .map(|tx| tx.clone())
            .collect();
        transactions.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(paginate(transactions, page))
    }

    async fn get_payer_account(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<PayerAccount>> {
        let Some(account_id) = self.payers_by_org.get(organization_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.payer_accounts.get(&account_id).map(|a| a.clone()))
    }

    async fn create_payer_account(
        &self,
        organization_id: &OrganizationId,
        opening_balance: Decimal,
    ) -> Result<PayerAccount> {
        if opening_balance.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(format!(
                "opening balance cannot be negative, got {opening_balance}"
            )));
        }
        match self.payers_by_org.entry(organization_id.clone()) {
            Entry::Occupied(entry) => {
                let account_id = *entry.get();
                drop(entry);
                self.payer_accounts
                    .get(&account_id)
                    .map(|a| a.clone())
                    .ok_or_else(|| LedgerError::PayerNotFound(account_id.to_string()))
            }
            Entry::Vacant(entry) => {
                let account = PayerAccount::new(organization_id.clone(), opening_balance);
                self.payer_accounts.insert(account.id, account.clone());
                entry.insert(account.id);
                Ok(account)
            }
        }
    }

    async fn deduct_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount> {
        self.check_fault(StoreOp::DeductPayerBalance)?;
        require_positive(amount)?;
        let mut account = self.payer_mut(account_id)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn credit_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount> {
        self.check_fault(StoreOp::CreditPayerBalance)?;
        require_positive(amount)?;
        let mut account = self.payer_mut(account_id)?;
        account.balance += amount;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn org(name: &str) -> OrganizationId {
        OrganizationId::new(name)
    }

    #[tokio::test]
    async fn test_create_wallet_is_idempotent_per_org() {
        let store = InMemoryLedgerStore::new();
        let first = store.create_wallet(&org("org_a")).await.unwrap();
        let second = store.create_wallet(&org("org_a")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.wallets().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_delta_unknown_wallet() {
        let store = InMemoryLedgerStore::new();
        let err = store
            .apply_balance_delta(WalletId::new(), dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_deltas_are_not_lost() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let wallet = store.create_wallet(&org("org_a")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.apply_balance_delta(wallet.id, dec!(1.50)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let wallet = store.get_wallet_by_id(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(75.00));
        assert!(wallet.is_balanced());
    }

    #[tokio::test]
    async fn test_deduct_payer_fails_closed() {
        let store = InMemoryLedgerStore::new();
        let payer = store
            .create_payer_account(&org("org_payer"), dec!(40))
            .await
            .unwrap();

        let err = store
            .deduct_payer_balance(payer.id, dec!(60))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                required: dec!(60),
                available: dec!(40),
            }
        );

        let payer = store.get_payer_account(&org("org_payer")).await.unwrap().unwrap();
        assert_eq!(payer.balance, dec!(40));
    }

    #[tokio::test]
    async fn test_status_cas_applies_once() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.create_wallet(&org("org_a")).await.unwrap();
        let withdrawal = Withdrawal::new(wallet.id, org("org_a"), dec!(60));
        store.create_withdrawal(&withdrawal).await.unwrap();

        let change = StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Processing);
        let first = store
            .update_withdrawal_status(withdrawal.id, &change)
            .await
            .unwrap();
        let second = store
            .update_withdrawal_status(withdrawal.id, &change)
            .await
            .unwrap();

        assert!(first.is_applied());
        assert_eq!(
            second,
            TransitionOutcome::Conflict {
                current: WithdrawalStatus::Processing
            }
        );
    }

    #[tokio::test]
    async fn test_pending_total_counts_outstanding_only() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.create_wallet(&org("org_a")).await.unwrap();

        let pending = Withdrawal::new(wallet.id, org("org_a"), dec!(60));
        let processing = Withdrawal::new(wallet.id, org("org_a"), dec!(70));
        let rejected = Withdrawal::new(wallet.id, org("org_a"), dec!(80));
        for w in [&pending, &processing, &rejected] {
            store.create_withdrawal(w).await.unwrap();
        }
        store
            .update_withdrawal_status(
                processing.id,
                &StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Processing),
            )
            .await
            .unwrap();
        store
            .update_withdrawal_status(
                rejected.id,
                &StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Rejected),
            )
            .await
            .unwrap();

        let total = store.pending_withdrawals_total(wallet.id).await.unwrap();
        assert_eq!(total, dec!(130));
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.create_wallet(&org("org_a")).await.unwrap();
        store.fail_next(StoreOp::ApplyBalanceDelta, 1);

        assert!(matches!(
            store.apply_balance_delta(wallet.id, dec!(5)).await,
            Err(LedgerError::Storage(_))
        ));
        assert!(store.apply_balance_delta(wallet.id, dec!(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_wallets_paid_by_payer() {
        let store = InMemoryLedgerStore::new();
        let payer = store
            .create_payer_account(&org("org_payer"), dec!(100))
            .await
            .unwrap();
        let paid = store.create_wallet(&org("org_paid")).await.unwrap();
        store.create_wallet(&org("org_other")).await.unwrap();

        for _ in 0..2 {
            let tx = FunctionExecutionTransaction::completed(
                marketpay_common::FunctionId::new("fn"),
                org("org_payer"),
                org("org_paid"),
                payer.id,
                paid.id,
                marketpay_common::FeeRate::zero().split(dec!(5)),
            );
            store.create_transaction(&tx).await.unwrap();
        }

        let wallets = store
            .list_wallets_paid_by(&org("org_payer"), Page::default())
            .await
            .unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].id, paid.id);
    }
}
