//! MarketPay Payout Provider Client
//!
//! The narrow interface the ledger uses to reach an external payout
//! provider: connected accounts, onboarding links, account status and
//! payouts. Also models the webhook events the provider delivers back.
//!
//! # Example
//!
//! ```rust,ignore
//! use marketpay_payout::{PayoutProvider, PayoutRequest};
//!
//! let request = PayoutRequest::for_withdrawal(&withdrawal, account_id, currency)?;
//! let payout_id = provider.create_payout(&request).await?;
//! ```

pub mod error;
pub mod event;
pub mod provider;

pub use error::{ProviderError, ProviderResult};
pub use event::{EventKind, WebhookEvent};
pub use provider::{OnboardingLink, PayoutMetadata, PayoutProvider, PayoutRequest};

#[cfg(any(test, feature = "test-utils"))]
pub use event::fixtures;
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockPayoutProvider;
