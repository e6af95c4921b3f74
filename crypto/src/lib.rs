//! MarketPay Cryptographic Primitives
//!
//! Hashing helpers and authentication of payout provider webhooks.

pub mod hash;
pub mod webhook;

pub use hash::{sha256, sha256_hex};
pub use webhook::{SignatureHeader, WebhookVerifier};

/// Errors from cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("Signature timestamp {timestamp} outside tolerance of {tolerance_secs}s")]
    TimestampOutsideTolerance { timestamp: i64, tolerance_secs: i64 },

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
