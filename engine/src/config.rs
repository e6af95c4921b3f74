//! Engine configuration.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;

use marketpay_common::{constants, Currency, FeeRate};

/// Withdrawal configuration.
#[derive(Debug, Clone)]
pub struct WithdrawalConfig {
    /// Smallest amount a developer may withdraw.
    pub minimum_amount: Decimal,
    /// Currency payouts are sent in.
    pub payout_currency: Currency,
    /// How long `stop` waits for in-flight submissions.
    pub drain_timeout: Duration,
    /// Poll interval while draining.
    pub drain_poll_interval: Duration,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            minimum_amount: Decimal::new(5000, 2),
            payout_currency: Currency::usd(),
            drain_timeout: constants::SUBMISSION_DRAIN_TIMEOUT,
            drain_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Settlement configuration.
#[derive(Debug, Clone, Default)]
pub struct SettlementConfig {
    /// Platform fee taken from each payment.
    pub fee_rate: FeeRate,
}

/// Webhook authentication configuration.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Shared signing secret.
    pub secret: String,
    /// Maximum signature age.
    pub signature_tolerance: ChronoDuration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signature_tolerance: constants::webhook_signature_tolerance(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"[redacted]")
            .field("signature_tolerance", &self.signature_tolerance)
            .finish()
    }
}

/// Payout provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Upper bound on each provider call.
    pub call_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            call_timeout: constants::PROVIDER_CALL_TIMEOUT,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL URL. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    /// Pool size for the PostgreSQL store.
    pub max_connections: u32,
    pub withdrawal: WithdrawalConfig,
    pub settlement: SettlementConfig,
    pub webhook: WebhookConfig,
    pub provider: ProviderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            withdrawal: WithdrawalConfig::default(),
            settlement: SettlementConfig::default(),
            webhook: WebhookConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables keep their defaults; `validate` catches
    /// values that parse but make no sense.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        if let Some(n) = env_parse::<u32>("MARKETPAY_DB_MAX_CONNECTIONS") {
            config.max_connections = n;
        }

        if let Some(amount) = env_parse::<Decimal>("MARKETPAY_MIN_WITHDRAWAL") {
            config.withdrawal.minimum_amount = amount;
        }

        if let Ok(currency) = std::env::var("MARKETPAY_PAYOUT_CURRENCY") {
            config.withdrawal.payout_currency = Currency::new(currency);
        }

        if let Some(secs) = env_parse::<u64>("MARKETPAY_DRAIN_TIMEOUT_SECS") {
            config.withdrawal.drain_timeout = Duration::from_secs(secs);
        }

        if let Some(percent) = env_parse::<Decimal>("MARKETPAY_FEE_PERCENT") {
            if let Ok(rate) = FeeRate::from_percent(percent) {
                config.settlement.fee_rate = rate;
            }
        }

        if let Ok(secret) = std::env::var("MARKETPAY_WEBHOOK_SECRET") {
            config.webhook.secret = secret;
        }

        if let Some(secs) = env_parse::<i64>("MARKETPAY_WEBHOOK_TOLERANCE_SECS") {
            config.webhook.signature_tolerance = ChronoDuration::seconds(secs);
        }

        if let Some(secs) = env_parse::<u64>("MARKETPAY_PROVIDER_TIMEOUT_SECS") {
            config.provider.call_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.withdrawal.minimum_amount <= Decimal::ZERO {
            return Err("Minimum withdrawal must be positive".to_string());
        }

        if self.withdrawal.payout_currency.code().len() != 3 {
            return Err("Payout currency must be a three-letter code".to_string());
        }

        if self.webhook.secret.is_empty() {
            return Err("Webhook secret cannot be empty".to_string());
        }

        if self.webhook.signature_tolerance <= ChronoDuration::zero() {
            return Err("Webhook signature tolerance must be positive".to_string());
        }

        if self.provider.call_timeout.is_zero() {
            return Err("Provider call timeout cannot be 0".to_string());
        }

        if self.withdrawal.drain_timeout < self.provider.call_timeout {
            return Err("Drain timeout cannot be shorter than the provider call timeout".to_string());
        }

        if self.database_url.is_some() && self.max_connections == 0 {
            return Err("Max connections cannot be 0".to_string());
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.webhook.secret = "whsec_test".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.withdrawal.minimum_amount, Decimal::new(5000, 2));
        assert_eq!(config.settlement.fee_rate, FeeRate::zero());
        assert_eq!(config.webhook.signature_tolerance, ChronoDuration::seconds(300));
        assert_eq!(config.provider.call_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.withdrawal.minimum_amount = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.withdrawal.drain_timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", valid_config());
        assert!(!rendered.contains("whsec_test"));
    }
}
