//! Error types for MarketPay ledger operations.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{InvalidTransition, PayerAccountId, WalletId, WithdrawalId, WithdrawalStatus};

/// Main error type for ledger, settlement and withdrawal operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// No wallet for the given organization or wallet id.
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(WithdrawalId),

    /// The paying organization (or account id) has no funding account.
    #[error("Payer account not found: {0}")]
    PayerNotFound(String),

    /// Amount is below the configured withdrawal minimum.
    #[error("Amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    /// Amount is zero, negative, or otherwise unusable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Wallet cannot withdraw until provider onboarding and payouts are enabled.
    #[error("Onboarding incomplete for wallet {0}")]
    OnboardingIncomplete(WalletId),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Wallet has not been linked to a provider account yet.
    #[error("No provider account linked to wallet {0}")]
    NoProviderAccount(WalletId),

    /// The payout provider call failed.
    #[error("Payout provider error: {0}")]
    Provider(String),

    /// Webhook signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Webhook body could not be parsed.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// The payer was debited but the payee credit failed.
    #[error(
        "Settlement inconsistent: payer account {payer_account} debited {amount} without payee credit \
         (compensated: {compensated}): {reason}"
    )]
    SettlementInconsistent {
        payer_account: PayerAccountId,
        amount: Decimal,
        compensated: bool,
        reason: String,
    },

    /// A withdrawal completed at the provider but the wallet debit failed.
    #[error("Withdrawal {withdrawal_id} completed without wallet debit: {reason}")]
    WithdrawalInconsistent {
        withdrawal_id: WithdrawalId,
        reason: String,
    },

    /// An event arrived for a withdrawal in a state it cannot apply to.
    #[error("Withdrawal {withdrawal_id} is in unexpected state {status}")]
    UnexpectedState {
        withdrawal_id: WithdrawalId,
        status: WithdrawalStatus,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    /// Engine is shutting down and not accepting new work.
    #[error("Engine is not accepting requests")]
    NotAccepting,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification used by callers to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    PreconditionFailed,
    ProviderError,
    InvalidSignature,
    Inconsistent,
    UnexpectedState,
    Internal,
}

impl LedgerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::WalletNotFound(_)
            | LedgerError::WithdrawalNotFound(_)
            | LedgerError::PayerNotFound(_) => ErrorKind::NotFound,
            LedgerError::BelowMinimum { .. }
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidPayload(_) => ErrorKind::ValidationFailed,
            LedgerError::OnboardingIncomplete(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::NoProviderAccount(_) => ErrorKind::PreconditionFailed,
            LedgerError::Provider(_) => ErrorKind::ProviderError,
            LedgerError::InvalidSignature(_) => ErrorKind::InvalidSignature,
            LedgerError::SettlementInconsistent { .. }
            | LedgerError::WithdrawalInconsistent { .. } => ErrorKind::Inconsistent,
            LedgerError::UnexpectedState { .. } | LedgerError::InvalidTransition { .. } => {
                ErrorKind::UnexpectedState
            }
            LedgerError::NotAccepting
            | LedgerError::Storage(_)
            | LedgerError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Check if the caller is at fault (maps to a 4xx response).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::ValidationFailed
                | ErrorKind::PreconditionFailed
                | ErrorKind::InvalidSignature
        )
    }

    /// Check if this error is retryable.
    ///
    /// Inconsistencies are never retryable; they need operator remediation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Provider(_) | LedgerError::Storage(_) | LedgerError::NotAccepting
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            LedgerError::PayerNotFound(_) => "PAYER_NOT_FOUND",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::OnboardingIncomplete(_) => "ONBOARDING_INCOMPLETE",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::NoProviderAccount(_) => "NO_PROVIDER_ACCOUNT",
            LedgerError::Provider(_) => "PROVIDER_ERROR",
            LedgerError::InvalidSignature(_) => "INVALID_SIGNATURE",
            LedgerError::InvalidPayload(_) => "INVALID_PAYLOAD",
            LedgerError::SettlementInconsistent { .. } => "SETTLEMENT_INCONSISTENT",
            LedgerError::WithdrawalInconsistent { .. } => "WITHDRAWAL_INCONSISTENT",
            LedgerError::UnexpectedState { .. } => "UNEXPECTED_STATE",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::NotAccepting => "NOT_ACCEPTING",
            LedgerError::Storage(_) => "STORAGE_ERROR",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<InvalidTransition> for LedgerError {
    fn from(err: InvalidTransition) -> Self {
        LedgerError::InvalidTransition {
            from: err.from,
            to: err.to,
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classification() {
        let err = LedgerError::BelowMinimum {
            amount: dec!(49.99),
            minimum: dec!(50),
        };
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.is_client_error());
        assert_eq!(err.error_code(), "BELOW_MINIMUM");

        let err = LedgerError::InsufficientFunds {
            required: dec!(60),
            available: dec!(40),
        };
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[test]
    fn test_inconsistency_is_loud_and_not_retryable() {
        let err = LedgerError::SettlementInconsistent {
            payer_account: PayerAccountId::new(),
            amount: dec!(100),
            compensated: false,
            reason: "wallet store unavailable".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
        assert!(!err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_transition_conversion() {
        let err: LedgerError = InvalidTransition {
            from: WithdrawalStatus::Failed,
            to: WithdrawalStatus::Completed,
        }
        .into();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }
}
