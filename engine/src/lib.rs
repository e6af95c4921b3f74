//! MarketPay Engine
//!
//! Moves money through developer wallets: settles function-execution
//! payments, turns withdrawal requests into provider payouts, and reconciles
//! the provider's webhook events back into the ledger.
//!
//! Every component takes its slice of `EngineConfig` explicitly;
//! `PaymentEngine` wires them together and owns the lifecycle.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod onboarding;
pub mod queries;
pub mod reconciler;
pub mod settlement;
pub mod state;
pub mod wallet_locks;
pub mod withdrawal;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, ProviderConfig, SettlementConfig, WebhookConfig, WithdrawalConfig};
pub use engine::{open_store, PaymentEngine};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use onboarding::{AccountStatus, OnboardingService, OnboardingSession};
pub use queries::{ConnectedDeveloper, HistoryPage, LedgerQueries, PaymentSide};
pub use reconciler::{WebhookAck, WebhookReconciler};
pub use settlement::{PaymentSettlement, SettlementReceipt, SettlementRequest};
pub use state::EngineState;
pub use withdrawal::{WithdrawalOrchestrator, WithdrawalReceipt};
