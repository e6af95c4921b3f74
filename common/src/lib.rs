//! MarketPay Common Types
//!
//! Shared types used across the MarketPay ledger, including identifiers,
//! monetary helpers, the withdrawal lifecycle, and the error taxonomy.

pub mod capabilities;
pub mod identifiers;
pub mod monetary;
pub mod withdrawal;
pub mod error;
pub mod time;

pub use capabilities::*;
pub use identifiers::*;
pub use monetary::*;
pub use withdrawal::*;
pub use error::*;
pub use time::*;
