//! Read-only views over wallets, payments and withdrawals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use marketpay_common::{OrganizationId, ProviderAccountId, Result, Withdrawal};
use marketpay_ledger::{
    FunctionExecutionTransaction, LedgerStore, Page, TransactionFilter, Wallet, WalletBalance,
    WalletLedger, MAX_PAGE_SIZE,
};

/// One page of results, echoing the normalized paging input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
}

/// A developer wallet as listed to operators and payers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedDeveloper {
    pub organization_id: OrganizationId,
    pub provider_account_id: Option<ProviderAccountId>,
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub onboarding_completed: bool,
    pub payouts_enabled: bool,
    pub charges_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<Wallet> for ConnectedDeveloper {
    fn from(wallet: Wallet) -> Self {
        Self {
            organization_id: wallet.organization_id,
            provider_account_id: wallet.provider_account_id,
            balance: wallet.balance,
            total_earned: wallet.total_earned,
            total_withdrawn: wallet.total_withdrawn,
            onboarding_completed: wallet.capabilities.onboarding_completed,
            payouts_enabled: wallet.capabilities.payouts_enabled,
            charges_enabled: wallet.capabilities.charges_enabled,
            joined_at: wallet.created_at,
        }
    }
}

/// Which side of a payment history to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSide {
    /// Payments received.
    Payee,
    /// Payments made.
    Payer,
}

/// Ledger read queries.
pub struct LedgerQueries {
    ledger: Arc<WalletLedger>,
}

impl LedgerQueries {
    pub fn new(ledger: Arc<WalletLedger>) -> Self {
        Self { ledger }
    }

    fn store(&self) -> &Arc<dyn LedgerStore> {
        self.ledger.store()
    }

    pub async fn wallet_balance(&self, organization_id: &OrganizationId) -> Result<WalletBalance> {
        self.ledger.balance_summary(organization_id).await
    }

    pub async fn transaction_history(
        &self,
        organization_id: &OrganizationId,
        side: PaymentSide,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<HistoryPage<FunctionExecutionTransaction>> {
        let (paging, page, limit) = normalize(page, limit);
        let filter = match side {
            PaymentSide::Payee => TransactionFilter::Payee(organization_id.clone()),
            PaymentSide::Payer => TransactionFilter::Payer(organization_id.clone()),
        };
        let items = self.store().list_transactions(&filter, paging).await?;
        Ok(HistoryPage { items, page, limit })
    }

    pub async fn withdrawal_history(
        &self,
        organization_id: &OrganizationId,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<HistoryPage<Withdrawal>> {
        let wallet = self.ledger.wallet(organization_id).await?;
        let (paging, page, limit) = normalize(page, limit);
        let items = self.store().list_withdrawals(wallet.id, paging).await?;
        Ok(HistoryPage { items, page, limit })
    }

    /// Every developer wallet, newest first.
    pub async fn connected_developers(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<HistoryPage<ConnectedDeveloper>> {
        let (paging, page, limit) = normalize(page, limit);
        let items = self
            .store()
            .list_wallets(paging)
            .await?
            .into_iter()
            .map(ConnectedDeveloper::from)
            .collect();
        Ok(HistoryPage { items, page, limit })
    }

    /// Developers this organization has paid at least once.
    pub async fn connected_developers_for_payer(
        &self,
        payer: &OrganizationId,
    ) -> Result<Vec<ConnectedDeveloper>> {
        let mut developers = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .store()
                .list_wallets_paid_by(payer, Page::new(Some(page), Some(MAX_PAGE_SIZE)))
                .await?;
            let done = batch.len() < MAX_PAGE_SIZE as usize;
            developers.extend(batch.into_iter().map(ConnectedDeveloper::from));
            if done {
                break;
            }
            page += 1;
        }
        Ok(developers)
    }
}

fn normalize(page: Option<u32>, limit: Option<u32>) -> (Page, u32, u32) {
    let paging = Page::new(page, limit);
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    (paging, page, paging.limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::settlement::{PaymentSettlement, SettlementRequest};
    use crate::config::SettlementConfig;
    use marketpay_common::FunctionId;
    use marketpay_ledger::{InMemoryLedgerStore, DEFAULT_PAGE_SIZE};
    use rust_decimal_macros::dec;

    async fn seeded() -> (Arc<WalletLedger>, LedgerQueries) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = Arc::new(WalletLedger::new(store.clone(), dec!(50)));
        let settlement = PaymentSettlement::new(
            ledger.clone(),
            SettlementConfig::default(),
            Arc::new(Metrics::new()),
        );
        store
            .create_payer_account(&OrganizationId::new("org_user"), dec!(1000))
            .await
            .unwrap();
        for (payee, amount) in [("org_a", dec!(10)), ("org_b", dec!(20)), ("org_a", dec!(5))] {
            settlement
                .settle(&SettlementRequest {
                    payer_organization_id: OrganizationId::new("org_user"),
                    function_id: FunctionId::new("fn_1"),
                    payee_organization_id: OrganizationId::new(payee),
                    gross_amount: amount,
                })
                .await
                .unwrap();
        }
        ledger
            .ensure_wallet(&OrganizationId::new("org_unpaid"))
            .await
            .unwrap();
        (ledger.clone(), LedgerQueries::new(ledger))
    }

    #[tokio::test]
    async fn test_transaction_history_by_side() {
        let (_ledger, queries) = seeded().await;

        let received = queries
            .transaction_history(&OrganizationId::new("org_a"), PaymentSide::Payee, None, None)
            .await
            .unwrap();
        assert_eq!(received.items.len(), 2);
        assert_eq!(received.page, 1);
        assert_eq!(received.limit, DEFAULT_PAGE_SIZE);

        let paid = queries
            .transaction_history(&OrganizationId::new("org_user"), PaymentSide::Payer, Some(1), Some(2))
            .await
            .unwrap();
        assert_eq!(paid.items.len(), 2);
        assert_eq!(paid.limit, 2);

        let second = queries
            .transaction_history(&OrganizationId::new("org_user"), PaymentSide::Payer, Some(2), Some(2))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.page, 2);
    }

    #[tokio::test]
    async fn test_connected_developers() {
        let (_ledger, queries) = seeded().await;

        let all = queries.connected_developers(None, Some(500)).await.unwrap();
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.limit, MAX_PAGE_SIZE);

        let mut paid: Vec<String> = queries
            .connected_developers_for_payer(&OrganizationId::new("org_user"))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.organization_id.to_string())
            .collect();
        paid.sort();
        assert_eq!(paid, vec!["org_a".to_string(), "org_b".to_string()]);

        assert!(queries
            .connected_developers_for_payer(&OrganizationId::new("org_a"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_wallet_balance_and_withdrawal_history() {
        let (_ledger, queries) = seeded().await;
        let balance = queries
            .wallet_balance(&OrganizationId::new("org_a"))
            .await
            .unwrap();
        assert_eq!(balance.balance, dec!(15));
        assert!(!balance.can_withdraw);

        let history = queries
            .withdrawal_history(&OrganizationId::new("org_a"), None, None)
            .await
            .unwrap();
        assert!(history.items.is_empty());

        assert!(queries
            .withdrawal_history(&OrganizationId::new("nobody"), None, None)
            .await
            .is_err());
    }
}
