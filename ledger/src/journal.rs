//! Append-only record of function-execution payments.

use chrono::{DateTime, Utc};
use marketpay_common::{
    FeeSplit, FunctionId, OrganizationId, PayerAccountId, TransactionId, WalletId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One settled function execution. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExecutionTransaction {
    pub id: TransactionId,
    pub function_id: FunctionId,
    pub payer_organization_id: OrganizationId,
    pub payee_organization_id: OrganizationId,
    pub payer_account_id: PayerAccountId,
    pub payee_wallet_id: WalletId,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    /// Always `gross_amount - platform_fee`.
    pub net_amount: Decimal,
    pub status: TransactionStatus,
    pub executed_at: DateTime<Utc>,
}

impl FunctionExecutionTransaction {
    /// Create a completed transaction record from a fee split.
    pub fn completed(
        function_id: FunctionId,
        payer_organization_id: OrganizationId,
        payee_organization_id: OrganizationId,
        payer_account_id: PayerAccountId,
        payee_wallet_id: WalletId,
        split: FeeSplit,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            function_id,
            payer_organization_id,
            payee_organization_id,
            payer_account_id,
            payee_wallet_id,
            gross_amount: split.gross,
            platform_fee: split.fee,
            net_amount: split.net,
            status: TransactionStatus::Completed,
            executed_at: Utc::now(),
        }
    }
}
