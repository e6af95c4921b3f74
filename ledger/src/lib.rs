//! MarketPay Ledger
//!
//! Wallet balances, withdrawal records and settlement history, behind a
//! storage interface with in-memory and PostgreSQL backends.
//!
//! Every balance change goes through a single atomic storage update; every
//! withdrawal status change is a compare-and-swap on the expected prior state.

pub mod account;
pub mod balance;
pub mod journal;
pub mod store;
pub mod memory;
pub mod postgres;
pub mod wallet_ledger;

pub use account::{PayerAccount, Wallet};
pub use marketpay_common::AccountCapabilities;
pub use balance::{IntegrityViolation, WalletBalance};
pub use journal::{FunctionExecutionTransaction, TransactionStatus};
pub use memory::{InMemoryLedgerStore, StoreOp};
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, Page, TransactionFilter, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use wallet_ledger::WalletLedger;
