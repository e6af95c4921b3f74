//! Function-execution payment settlement.
//!
//! Moves a payment from a payer account into a developer wallet. The payer
//! debit, the payee credit and the audit record are separate storage writes;
//! a failed payee credit is compensated by crediting the payer back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use marketpay_common::{
    round_money, FeeRate, FunctionId, LedgerError, OrganizationId, Result, TransactionId,
};
use marketpay_ledger::{FunctionExecutionTransaction, LedgerStore, WalletLedger};

use crate::config::SettlementConfig;
use crate::metrics::SharedMetrics;

/// A payment for one function execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub payer_organization_id: OrganizationId,
    pub function_id: FunctionId,
    pub payee_organization_id: OrganizationId,
    pub gross_amount: Decimal,
}

/// Outcome of a settled payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub transaction_id: TransactionId,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
    pub payer_balance_after: Decimal,
    pub payee_balance_after: Decimal,
    /// `false` if the money moved but the transaction record could not be
    /// written.
    pub audit_recorded: bool,
    pub executed_at: DateTime<Utc>,
}

/// Settles function-execution payments.
pub struct PaymentSettlement {
    ledger: Arc<WalletLedger>,
    fee_rate: FeeRate,
    metrics: SharedMetrics,
}

impl PaymentSettlement {
    pub fn new(ledger: Arc<WalletLedger>, config: SettlementConfig, metrics: SharedMetrics) -> Self {
        Self {
            ledger,
            fee_rate: config.fee_rate,
            metrics,
        }
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    fn store(&self) -> &Arc<dyn LedgerStore> {
        self.ledger.store()
    }

    /// Settle one payment.
    #[instrument(
        skip(self, request),
        fields(
            payer = %request.payer_organization_id,
            payee = %request.payee_organization_id,
            function_id = %request.function_id,
            gross = %request.gross_amount,
        )
    )]
    pub async fn settle(&self, request: &SettlementRequest) -> Result<SettlementReceipt> {
        self.metrics.settlement_initiated();
        let result = self.execute(request).await;
        match &result {
            Ok(_) => self.metrics.settlement_success(),
            Err(LedgerError::SettlementInconsistent { .. }) => self.metrics.settlement_inconsistent(),
            Err(e) => {
                self.metrics.settlement_failed();
                info!(error_code = e.error_code(), error = %e, "Settlement refused");
            }
        }
        result
    }

    async fn execute(&self, request: &SettlementRequest) -> Result<SettlementReceipt> {
        let gross = request.gross_amount;
        if gross <= Decimal::ZERO || round_money(gross) != gross {
            return Err(LedgerError::InvalidAmount(format!(
                "payment amount {gross} must be positive with at most two decimal places"
            )));
        }

        let payer = self
            .store()
            .get_payer_account(&request.payer_organization_id)
            .await?
            .ok_or_else(|| LedgerError::PayerNotFound(request.payer_organization_id.to_string()))?;

        // Optimistic; the conditional debit below is what actually guards.
        if payer.balance < gross {
            return Err(LedgerError::InsufficientFunds {
                required: gross,
                available: payer.balance,
            });
        }

        let payee = self
            .ledger
            .ensure_wallet(&request.payee_organization_id)
            .await?;
        let split = self.fee_rate.split(gross);

        let payer = self.store().deduct_payer_balance(payer.id, gross).await?;

        let payee_balance_after = if split.net.is_zero() {
            payee.balance
        } else {
            match self.ledger.apply_delta(payee.id, split.net).await {
                Ok(wallet) => wallet.balance,
                Err(e) => {
                    let compensated = match self.store().credit_payer_balance(payer.id, gross).await {
                        Ok(_) => true,
                        Err(comp_err) => {
                            error!(
                                payer_account = %payer.id,
                                amount = %gross,
                                error = %comp_err,
                                "Compensating payer credit failed"
                            );
                            false
                        }
                    };
                    error!(
                        payer_account = %payer.id,
                        wallet_id = %payee.id,
                        amount = %gross,
                        compensated,
                        error = %e,
                        "Payee credit failed after payer debit"
                    );
                    return Err(LedgerError::SettlementInconsistent {
                        payer_account: payer.id,
                        amount: gross,
                        compensated,
                        reason: e.to_string(),
                    });
                }
            }
        };

        let transaction = FunctionExecutionTransaction::completed(
            request.function_id.clone(),
            request.payer_organization_id.clone(),
            request.payee_organization_id.clone(),
            payer.id,
            payee.id,
            split,
        );
        let audit_recorded = match self.store().create_transaction(&transaction).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Settlement succeeded but transaction record was not written"
                );
                false
            }
        };

        info!(
            transaction_id = %transaction.id,
            fee = %split.fee,
            net = %split.net,
            "Payment settled"
        );

        Ok(SettlementReceipt {
            transaction_id: transaction.id,
            gross_amount: split.gross,
            platform_fee: split.fee,
            net_amount: split.net,
            payer_balance_after: payer.balance,
            payee_balance_after,
            audit_recorded,
            executed_at: transaction.executed_at,
        })
    }
}
