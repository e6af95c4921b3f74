//! PostgreSQL ledger store.
//!
//! Conditional writes are single statements: balance deltas add in place,
//! payer deductions carry `balance >= $amount` in the `WHERE` clause, and
//! withdrawal transitions match on the expected prior status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, instrument};

use marketpay_common::{
    AccountCapabilities, FunctionId, LedgerError, OrganizationId, PayerAccountId, PayoutId, ProviderAccountId, Result,
    StatusChange, TransactionId, TransitionOutcome, WalletId, Withdrawal, WithdrawalId,
    WithdrawalStatus,
};

use crate::account::{PayerAccount, Wallet};
use crate::journal::{FunctionExecutionTransaction, TransactionStatus};
use crate::store::{LedgerStore, Page, TransactionFilter};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS developer_wallets (
    id UUID PRIMARY KEY,
    organization_id TEXT NOT NULL UNIQUE,
    provider_account_id TEXT,
    onboarding_url TEXT,
    balance NUMERIC NOT NULL DEFAULT 0,
    total_earned NUMERIC NOT NULL DEFAULT 0 CHECK (total_earned >= 0),
    total_withdrawn NUMERIC NOT NULL DEFAULT 0 CHECK (total_withdrawn >= 0),
    onboarding_completed BOOLEAN NOT NULL DEFAULT FALSE,
    payouts_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    charges_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS withdrawal_requests (
    id UUID PRIMARY KEY,
    wallet_id UUID NOT NULL REFERENCES developer_wallets (id),
    organization_id TEXT NOT NULL,
    amount NUMERIC NOT NULL CHECK (amount > 0),
    status TEXT NOT NULL,
    payout_id TEXT,
    failure_reason TEXT,
    requested_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_withdrawal_requests_wallet_status
    ON withdrawal_requests (wallet_id, status);
CREATE TABLE IF NOT EXISTS payer_accounts (
    id UUID PRIMARY KEY,
    organization_id TEXT NOT NULL UNIQUE,
    balance NUMERIC NOT NULL CHECK (balance >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS function_execution_transactions (
    id UUID PRIMARY KEY,
    function_id TEXT NOT NULL,
    payer_organization_id TEXT NOT NULL,
    payee_organization_id TEXT NOT NULL,
    payer_account_id UUID NOT NULL,
    payee_wallet_id UUID NOT NULL,
    gross_amount NUMERIC NOT NULL CHECK (gross_amount > 0),
    platform_fee NUMERIC NOT NULL CHECK (platform_fee >= 0),
    net_amount NUMERIC NOT NULL CHECK (net_amount >= 0),
    status TEXT NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fe_transactions_payer
    ON function_execution_transactions (payer_organization_id, executed_at DESC);
CREATE INDEX IF NOT EXISTS idx_fe_transactions_payee
    ON function_execution_transactions (payee_organization_id, executed_at DESC)
"#;

const WALLET_COLUMNS: &str = "id, organization_id, provider_account_id, onboarding_url, \
     balance, total_earned, total_withdrawn, onboarding_completed, payouts_enabled, \
     charges_enabled, created_at, updated_at";

const WITHDRAWAL_COLUMNS: &str = "id, wallet_id, organization_id, amount, status, payout_id, \
     failure_reason, requested_at, updated_at, completed_at";

const PAYER_COLUMNS: &str = "id, organization_id, balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, function_id, payer_organization_id, \
     payee_organization_id, payer_account_id, payee_wallet_id, gross_amount, platform_fee, \
     net_amount, status, executed_at";

/// `LedgerStore` backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage)?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        info!("Ledger schema ready");
        Ok(())
    }
}

fn storage(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn decode(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(format!("row decode failed: {err}"))
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: WalletId::from_uuid(row.try_get("id").map_err(storage)?),
        organization_id: OrganizationId::new(
            row.try_get::<String, _>("organization_id").map_err(storage)?,
        ),
        provider_account_id: row
            .try_get::<Option<String>, _>("provider_account_id")
            .map_err(storage)?
            .map(ProviderAccountId::new),
        onboarding_url: row.try_get("onboarding_url").map_err(storage)?,
        balance: row.try_get("balance").map_err(storage)?,
        total_earned: row.try_get("total_earned").map_err(storage)?,
        total_withdrawn: row.try_get("total_withdrawn").map_err(storage)?,
        capabilities: AccountCapabilities {
            onboarding_completed: row.try_get("onboarding_completed").map_err(storage)?,
            payouts_enabled: row.try_get("payouts_enabled").map_err(storage)?,
            charges_enabled: row.try_get("charges_enabled").map_err(storage)?,
        },
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal> {
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(Withdrawal {
        id: WithdrawalId::from_uuid(row.try_get("id").map_err(storage)?),
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id").map_err(storage)?),
        organization_id: OrganizationId::new(
            row.try_get::<String, _>("organization_id").map_err(storage)?,
        ),
        amount: row.try_get("amount").map_err(storage)?,
        status: WithdrawalStatus::parse(&status)
            .ok_or_else(|| decode(format!("unknown withdrawal status {status:?}")))?,
        payout_id: row
            .try_get::<Option<String>, _>("payout_id")
            .map_err(storage)?
            .map(PayoutId::new),
        failure_reason: row.try_get("failure_reason").map_err(storage)?,
        requested_at: row.try_get("requested_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
        completed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("completed_at")
            .map_err(storage)?,
    })
}

fn payer_from_row(row: &PgRow) -> Result<PayerAccount> {
    Ok(PayerAccount {
        id: PayerAccountId::from_uuid(row.try_get("id").map_err(storage)?),
        organization_id: OrganizationId::new(
            row.try_get::<String, _>("organization_id").map_err(storage)?,
        ),
        balance: row.try_get("balance").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<FunctionExecutionTransaction> {
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(FunctionExecutionTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(storage)?),
        function_id: FunctionId::new(row.try_get::<String, _>("function_id").map_err(storage)?),
        payer_organization_id: OrganizationId::new(
            row.try_get::<String, _>("payer_organization_id")
                .map_err(storage)?,
        ),
        payee_organization_id: OrganizationId::new(
            row.try_get::<String, _>("payee_organization_id")
                .map_err(storage)?,
        ),
        payer_account_id: PayerAccountId::from_uuid(
            row.try_get("payer_account_id").map_err(storage)?,
        ),
        payee_wallet_id: WalletId::from_uuid(row.try_get("payee_wallet_id").map_err(storage)?),
        gross_amount: row.try_get("gross_amount").map_err(storage)?,
        platform_fee: row.try_get("platform_fee").map_err(storage)?,
        net_amount: row.try_get("net_amount").map_err(storage)?,
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| decode(format!("unknown transaction status {status:?}")))?,
        executed_at: row.try_get("executed_at").map_err(storage)?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_wallet(&self, organization_id: &OrganizationId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM developer_wallets WHERE organization_id = $1");
        sqlx::query(&sql)
            .bind(organization_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| wallet_from_row(&row))
            .transpose()
    }

    async fn get_wallet_by_id(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM developer_wallets WHERE id = $1");
        sqlx::query(&sql)
            .bind(*wallet_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| wallet_from_row(&row))
            .transpose()
    }

    async fn create_wallet(&self, organization_id: &OrganizationId) -> Result<Wallet> {
        let wallet = Wallet::new(organization_id.clone());
        sqlx::query(
            "INSERT INTO developer_wallets (id, organization_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) ON CONFLICT (organization_id) DO NOTHING",
        )
        .bind(*wallet.id.as_uuid())
        .bind(organization_id.as_str())
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_wallet(organization_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(organization_id.to_string()))
    }

    async fn list_wallets(&self, page: Page) -> Result<Vec<Wallet>> {
        let sql = format!(
            "SELECT {WALLET_COLUMNS} FROM developer_wallets \
             ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );
        sqlx::query(&sql)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(wallet_from_row)
            .collect()
    }

    async fn list_wallets_paid_by(
        &self,
        payer: &OrganizationId,
        page: Page,
    ) -> Result<Vec<Wallet>> {
        let sql = format!(
            "SELECT {WALLET_COLUMNS} FROM developer_wallets WHERE id IN ( \
                 SELECT DISTINCT payee_wallet_id FROM function_execution_transactions \
                 WHERE payer_organization_id = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(payer.as_str())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(wallet_from_row)
            .collect()
    }

    async fn set_provider_account(
        &self,
        wallet_id: WalletId,
        account_id: &ProviderAccountId,
        onboarding_url: Option<&str>,
    ) -> Result<Wallet> {
        let sql = format!(
            "UPDATE developer_wallets \
             SET provider_account_id = $1, onboarding_url = COALESCE($2, onboarding_url), \
                 updated_at = NOW() \
             WHERE id = $3 RETURNING {WALLET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.as_str())
            .bind(onboarding_url)
            .bind(*wallet_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;
        wallet_from_row(&row)
    }

    async fn update_capabilities(
        &self,
        wallet_id: WalletId,
        capabilities: AccountCapabilities,
    ) -> Result<Wallet> {
        let sql = format!(
            "UPDATE developer_wallets \
             SET onboarding_completed = $1, payouts_enabled = $2, charges_enabled = $3, \
                 updated_at = NOW() \
             WHERE id = $4 RETURNING {WALLET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(capabilities.onboarding_completed)
            .bind(capabilities.payouts_enabled)
            .bind(capabilities.charges_enabled)
            .bind(*wallet_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;
        wallet_from_row(&row)
    }

    async fn apply_balance_delta(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("balance delta must be non-zero".into()));
        }
        let sql = format!(
            "UPDATE developer_wallets \
             SET balance = balance + $1, \
                 total_earned = total_earned + GREATEST($1, 0), \
                 total_withdrawn = total_withdrawn + GREATEST(-$1, 0), \
                 updated_at = NOW() \
             WHERE id = $2 RETURNING {WALLET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(amount)
            .bind(*wallet_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;
        wallet_from_row(&row)
    }

    async fn pending_withdrawals_total(&self, wallet_id: WalletId) -> Result<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM withdrawal_requests \
             WHERE wallet_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(*wallet_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(
            "INSERT INTO withdrawal_requests \
             (id, wallet_id, organization_id, amount, status, payout_id, failure_reason, \
              requested_at, updated_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(*withdrawal.id.as_uuid())
        .bind(*withdrawal.wallet_id.as_uuid())
        .bind(withdrawal.organization_id.as_str())
        .bind(withdrawal.amount)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.payout_id.as_ref().map(|p| p.as_str()))
        .bind(withdrawal.failure_reason.as_deref())
        .bind(withdrawal.requested_at)
        .bind(withdrawal.updated_at)
        .bind(withdrawal.completed_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests WHERE id = $1");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| withdrawal_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self, change), fields(withdrawal_id = %id, to = %change.next))]
    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        change: &StatusChange,
    ) -> Result<TransitionOutcome> {
        if !change.expected.can_transition_to(change.next) {
            return Err(LedgerError::InvalidTransition {
                from: change.expected,
                to: change.next,
            });
        }

        let sql = format!(
            "UPDATE withdrawal_requests \
             SET status = $1, \
                 payout_id = COALESCE($2, payout_id), \
                 failure_reason = COALESCE($3, failure_reason), \
                 completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $5 AND status = $6 RETURNING {WITHDRAWAL_COLUMNS}"
        );
        let stamps_completion = matches!(
            change.next,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Rejected
        );
        let updated = sqlx::query(&sql)
            .bind(change.next.as_str())
            .bind(change.payout_id.as_ref().map(|p| p.as_str()))
            .bind(change.failure_reason.as_deref())
            .bind(stamps_completion)
            .bind(*id.as_uuid())
            .bind(change.expected.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        if let Some(row) = updated {
            return Ok(TransitionOutcome::Applied(withdrawal_from_row(&row)?));
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM withdrawal_requests WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        match current {
            None => Err(LedgerError::WithdrawalNotFound(id)),
            Some(status) => Ok(TransitionOutcome::Conflict {
                current: WithdrawalStatus::parse(&status)
                    .ok_or_else(|| decode(format!("unknown withdrawal status {status:?}")))?,
            }),
        }
    }

    async fn list_withdrawals(&self, wallet_id: WalletId, page: Page) -> Result<Vec<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests WHERE wallet_id = $1 \
             ORDER BY requested_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(*wallet_id.as_uuid())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(withdrawal_from_row)
            .collect()
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: u32,
    ) -> Result<Vec<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests WHERE status = $1 \
             ORDER BY requested_at ASC LIMIT $2"
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(withdrawal_from_row)
            .collect()
    }

    async fn create_transaction(&self, transaction: &FunctionExecutionTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO function_execution_transactions \
             (id, function_id, payer_organization_id, payee_organization_id, payer_account_id, \
              payee_wallet_id, gross_amount, platform_fee, net_amount, status, executed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(*transaction.id.as_uuid())
        .bind(transaction.function_id.as_str())
        .bind(transaction.payer_organization_id.as_str())
        .bind(transaction.payee_organization_id.as_str())
        .bind(*transaction.payer_account_id.as_uuid())
        .bind(*transaction.payee_wallet_id.as_uuid())
        .bind(transaction.gross_amount)
        .bind(transaction.platform_fee)
        .bind(transaction.net_amount)
        .bind(transaction.status.as_str())
        .bind(transaction.executed_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Vec<FunctionExecutionTransaction>> {
        let (column, org) = match filter {
            TransactionFilter::Payee(org) => ("payee_organization_id", org),
            TransactionFilter::Payer(org) => ("payer_organization_id", org),
        };
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM function_execution_transactions \
             WHERE {column} = $1 ORDER BY executed_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(org.as_str())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn get_payer_account(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<PayerAccount>> {
        let sql = format!("SELECT {PAYER_COLUMNS} FROM payer_accounts WHERE organization_id = $1");
        sqlx::query(&sql)
            .bind(organization_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| payer_from_row(&row))
            .transpose()
    }

    async fn create_payer_account(
        &self,
        organization_id: &OrganizationId,
        opening_balance: Decimal,
    ) -> Result<PayerAccount> {
        let account = PayerAccount::new(organization_id.clone(), opening_balance);
        sqlx::query(
            "INSERT INTO payer_accounts (id, organization_id, balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) ON CONFLICT (organization_id) DO NOTHING",
        )
        .bind(*account.id.as_uuid())
        .bind(organization_id.as_str())
        .bind(opening_balance)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_payer_account(organization_id)
            .await?
            .ok_or_else(|| LedgerError::PayerNotFound(organization_id.to_string()))
    }

    async fn deduct_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount> {
        let sql = format!(
            "UPDATE payer_accounts SET balance = balance - $1, updated_at = NOW() \
             WHERE id = $2 AND balance >= $1 RETURNING {PAYER_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(amount)
            .bind(*account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        if let Some(row) = updated {
            return payer_from_row(&row);
        }

        let available: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM payer_accounts WHERE id = $1")
                .bind(*account_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        match available {
            None => Err(LedgerError::PayerNotFound(account_id.to_string())),
            Some(available) => Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            }),
        }
    }

    async fn credit_payer_balance(
        &self,
        account_id: PayerAccountId,
        amount: Decimal,
    ) -> Result<PayerAccount> {
        let sql = format!(
            "UPDATE payer_accounts SET balance = balance + $1, updated_at = NOW() \
             WHERE id = $2 RETURNING {PAYER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(amount)
            .bind(*account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::PayerNotFound(account_id.to_string()))?;
        payer_from_row(&row)
    }
}

/// These run against a live database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store() -> Option<PgLedgerStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgLedgerStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    fn unique_org() -> OrganizationId {
        OrganizationId::new(format!("org_{}", WalletId::new()))
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_balance_deltas_track_totals() {
        let Some(store) = store().await else { return };
        let wallet = store.create_wallet(&unique_org()).await.unwrap();

        store.apply_balance_delta(wallet.id, dec!(100)).await.unwrap();
        let wallet = store.apply_balance_delta(wallet.id, dec!(-40)).await.unwrap();

        assert_eq!(wallet.balance, dec!(60));
        assert_eq!(wallet.total_earned, dec!(100));
        assert_eq!(wallet.total_withdrawn, dec!(40));
        assert!(wallet.is_balanced());
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_payer_deduction_is_conditional() {
        let Some(store) = store().await else { return };
        let payer = store
            .create_payer_account(&unique_org(), dec!(50))
            .await
            .unwrap();

        let payer = store.deduct_payer_balance(payer.id, dec!(30)).await.unwrap();
        assert_eq!(payer.balance, dec!(20));

        match store.deduct_payer_balance(payer.id, dec!(30)).await {
            Err(LedgerError::InsufficientFunds { available, .. }) => {
                assert_eq!(available, dec!(20))
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        let payer = store
            .get_payer_account(&payer.organization_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payer.balance, dec!(20));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_status_update_matches_expected_status() {
        let Some(store) = store().await else { return };
        let org = unique_org();
        let wallet = store.create_wallet(&org).await.unwrap();
        let withdrawal = Withdrawal::new(wallet.id, org, dec!(75));
        store.create_withdrawal(&withdrawal).await.unwrap();

        let outcome = store
            .update_withdrawal_status(
                withdrawal.id,
                &StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Processing)
                    .with_payout(PayoutId::new("po_pg")),
            )
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let outcome = store
            .update_withdrawal_status(
                withdrawal.id,
                &StatusChange::new(WithdrawalStatus::Pending, WithdrawalStatus::Failed)
                    .with_reason("late"),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Conflict {
                current: WithdrawalStatus::Processing
            }
        );

        let stored = store.get_withdrawal(withdrawal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Processing);
        assert_eq!(stored.payout_id, Some(PayoutId::new("po_pg")));
        assert!(stored.failure_reason.is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_concurrent_transitions_apply_once() {
        let Some(store) = store().await else { return };
        let store = std::sync::Arc::new(store);
        let org = unique_org();
        let wallet = store.create_wallet(&org).await.unwrap();
        let withdrawal = Withdrawal::new(wallet.id, org, dec!(75));
        store.create_withdrawal(&withdrawal).await.unwrap();

        let mut handles = Vec::new();
        for next in [
            WithdrawalStatus::Processing,
            WithdrawalStatus::Rejected,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Rejected,
        ] {
            let store = store.clone();
            let id = withdrawal.id;
            handles.push(tokio::spawn(async move {
                store
                    .update_withdrawal_status(id, &StatusChange::new(WithdrawalStatus::Pending, next))
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
