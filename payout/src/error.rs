//! Payout provider error types.

use marketpay_common::{LedgerError, ProviderAccountId};
use thiserror::Error;

/// Errors returned by a payout provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// The connected account does not exist at the provider.
    #[error("Provider account not found: {0}")]
    AccountNotFound(ProviderAccountId),

    /// The provider refused the request.
    #[error("Provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The call did not complete within the configured timeout.
    #[error("Provider call timed out")]
    Timeout,

    /// The provider could not be reached.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The request could not be built.
    #[error("Invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// The outcome of the call is unknown; the provider may still act on it.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout)
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Unavailable(_))
    }
}

impl From<ProviderError> for LedgerError {
    fn from(err: ProviderError) -> Self {
        LedgerError::Provider(err.to_string())
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;
