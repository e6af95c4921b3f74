//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// Load profile for one simulation run.
///
/// Rates are probabilities in `[0, 1]` applied per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    /// Settlements attempted, all submitted concurrently.
    pub settlements: usize,
    /// Largest gross amount of a single settlement, in cents.
    pub max_settlement_cents: i64,
    /// Chance a developer with enough balance also files a second,
    /// concurrent withdrawal.
    pub double_withdrawal_rate: f64,
    /// Chance the provider rejects a payout submission.
    pub provider_rejection_rate: f64,
    /// Chance a payout submission times out.
    pub provider_timeout_rate: f64,
    /// Chance each webhook is delivered twice.
    pub duplicate_rate: f64,
    /// Chance a completed payout later bounces with `payout.failed`.
    pub reversal_rate: f64,
    /// Deliveries sent with a forged signature.
    pub forged_deliveries: usize,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "steady" => Ok(Self::steady()),
            "webhook-storm" => Ok(Self::webhook_storm()),
            "provider-outage" => Ok(Self::provider_outage()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    pub fn names() -> &'static [&'static str] {
        &["steady", "webhook-storm", "provider-outage"]
    }

    /// Mostly healthy traffic with occasional provider trouble.
    fn steady() -> Self {
        Self {
            name: "steady".to_string(),
            description: "Mostly healthy payments and payouts".to_string(),
            settlements: 200,
            max_settlement_cents: 4_000,
            double_withdrawal_rate: 0.1,
            provider_rejection_rate: 0.05,
            provider_timeout_rate: 0.05,
            duplicate_rate: 0.2,
            reversal_rate: 0.05,
            forged_deliveries: 2,
        }
    }

    /// Every webhook arrives several times and out of order.
    fn webhook_storm() -> Self {
        Self {
            name: "webhook-storm".to_string(),
            description: "Duplicated, reordered and forged webhook deliveries".to_string(),
            settlements: 150,
            max_settlement_cents: 6_000,
            double_withdrawal_rate: 0.3,
            provider_rejection_rate: 0.1,
            provider_timeout_rate: 0.2,
            duplicate_rate: 0.9,
            reversal_rate: 0.25,
            forged_deliveries: 20,
        }
    }

    /// The provider times out or rejects most submissions; webhooks settle
    /// the outcome later.
    fn provider_outage() -> Self {
        Self {
            name: "provider-outage".to_string(),
            description: "Payout submissions mostly time out or fail".to_string(),
            settlements: 150,
            max_settlement_cents: 5_000,
            double_withdrawal_rate: 0.2,
            provider_rejection_rate: 0.3,
            provider_timeout_rate: 0.5,
            duplicate_rate: 0.3,
            reversal_rate: 0.1,
            forged_deliveries: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_scenarios_load() {
        for name in Scenario::names() {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(&scenario.name, name);
            for rate in [
                scenario.double_withdrawal_rate,
                scenario.provider_rejection_rate,
                scenario.provider_timeout_rate,
                scenario.duplicate_rate,
                scenario.reversal_rate,
            ] {
                assert!((0.0..=1.0).contains(&rate));
            }
            assert!(scenario.provider_rejection_rate + scenario.provider_timeout_rate <= 1.0);
        }
        assert!(Scenario::load("nope").is_err());
    }
}
