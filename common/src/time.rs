//! Timing constants shared by the engine and its collaborators.

use chrono::{DateTime, Duration, Utc};

/// Default timing values.
pub mod constants {
    use super::Duration;

    /// Maximum age of a signed webhook before it is rejected (5 minutes).
    pub fn webhook_signature_tolerance() -> Duration {
        Duration::minutes(5)
    }

    /// Upper bound on a single payout provider call.
    pub const PROVIDER_CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

    /// How long shutdown waits for in-flight payout submissions.
    pub const SUBMISSION_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    /// Validity window the provider gives an onboarding link (5 minutes).
    pub fn onboarding_link_validity() -> Duration {
        Duration::minutes(5)
    }
}

/// What callers are told to expect after a withdrawal is accepted.
pub const ESTIMATED_PAYOUT_ARRIVAL: &str = "2-3 business days";

/// Get current UTC timestamp.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
