//! Provider-reported account capabilities.

use serde::{Deserialize, Serialize};

/// Capability flags for a connected payout account, as reported by the provider.
///
/// These are only ever overwritten with provider truth, never inferred locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCapabilities {
    /// The organization finished the provider's onboarding flow.
    pub onboarding_completed: bool,
    pub payouts_enabled: bool,
    pub charges_enabled: bool,
}

impl AccountCapabilities {
    /// Both onboarding and payouts must be enabled before money can leave.
    pub fn can_pay_out(&self) -> bool {
        self.onboarding_completed && self.payouts_enabled
    }
}
