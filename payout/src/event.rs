//! Provider webhook events.
//!
//! Events arrive as `{"id", "type", "created", "data": {"object": {...}}}`.
//! Only the fields the reconciler acts on are decoded; everything else in
//! the object is ignored.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use marketpay_common::{
    AccountCapabilities, LedgerError, OrganizationId, PayoutId, ProviderAccountId, Result,
    WithdrawalId,
};
use serde::Deserialize;
use tracing::warn;

pub const ACCOUNT_UPDATED: &str = "account.updated";
pub const PAYOUT_PAID: &str = "payout.paid";
pub const PAYOUT_FAILED: &str = "payout.failed";

/// A decoded provider event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    /// Provider event id.
    pub id: String,
    /// Raw event type, e.g. `payout.paid`.
    pub event_type: String,
    pub created: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

/// What an event says happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    AccountUpdated {
        account_id: ProviderAccountId,
        /// From `metadata.organization_id`; absent if the account was not
        /// created by us.
        organization_id: Option<OrganizationId>,
        capabilities: AccountCapabilities,
    },
    PayoutPaid {
        payout_id: PayoutId,
        withdrawal_id: Option<WithdrawalId>,
    },
    PayoutFailed {
        payout_id: PayoutId,
        withdrawal_id: Option<WithdrawalId>,
        /// `"<failure_code>: <failure_message>"`.
        reason: String,
    },
    /// An event type the ledger does not handle.
    Unknown,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawAccount {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    details_submitted: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    charges_enabled: bool,
}

#[derive(Deserialize)]
struct RawPayout {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    failure_code: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
}

impl RawPayout {
    fn withdrawal_id(&self) -> Option<WithdrawalId> {
        let raw = self.metadata.get("withdrawal_id").filter(|s| !s.is_empty())?;
        match WithdrawalId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(payout_id = %self.id, withdrawal_id = %raw, error = %e, "Unparseable withdrawal id in payout metadata");
                None
            }
        }
    }
}

impl WebhookEvent {
    /// Decode a verified webhook payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawEvent = serde_json::from_slice(payload).map_err(invalid)?;
        let created = raw
            .created
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let kind = match raw.event_type.as_str() {
            ACCOUNT_UPDATED => {
                let account: RawAccount =
                    serde_json::from_value(raw.data.object).map_err(invalid)?;
                EventKind::AccountUpdated {
                    organization_id: account
                        .metadata
                        .get("organization_id")
                        .filter(|s| !s.is_empty())
                        .map(OrganizationId::new),
                    account_id: ProviderAccountId::new(account.id),
                    capabilities: AccountCapabilities {
                        onboarding_completed: account.details_submitted,
                        payouts_enabled: account.payouts_enabled,
                        charges_enabled: account.charges_enabled,
                    },
                }
            }
            PAYOUT_PAID => {
                let payout: RawPayout =
                    serde_json::from_value(raw.data.object).map_err(invalid)?;
                EventKind::PayoutPaid {
                    withdrawal_id: payout.withdrawal_id(),
                    payout_id: PayoutId::new(payout.id),
                }
            }
            PAYOUT_FAILED => {
                let payout: RawPayout =
                    serde_json::from_value(raw.data.object).map_err(invalid)?;
                let reason = format!(
                    "{}: {}",
                    payout.failure_code.as_deref().unwrap_or_default(),
                    payout.failure_message.as_deref().unwrap_or_default()
                );
                EventKind::PayoutFailed {
                    withdrawal_id: payout.withdrawal_id(),
                    payout_id: PayoutId::new(payout.id),
                    reason,
                }
            }
            _ => EventKind::Unknown,
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            created,
            kind,
        })
    }
}

fn invalid(err: serde_json::Error) -> LedgerError {
    LedgerError::InvalidPayload(err.to_string())
}

/// Payload builders matching what the provider sends.
#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        json!({
            "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
            "type": event_type,
            "created": Utc::now().timestamp(),
            "data": { "object": object },
        })
        .to_string()
        .into_bytes()
    }

    pub fn account_updated(
        account_id: &ProviderAccountId,
        organization_id: Option<&OrganizationId>,
        capabilities: AccountCapabilities,
    ) -> Vec<u8> {
        let metadata = match organization_id {
            Some(org) => json!({ "organization_id": org.as_str() }),
            None => json!({}),
        };
        envelope(
            ACCOUNT_UPDATED,
            json!({
                "id": account_id.as_str(),
                "object": "account",
                "metadata": metadata,
                "details_submitted": capabilities.onboarding_completed,
                "payouts_enabled": capabilities.payouts_enabled,
                "charges_enabled": capabilities.charges_enabled,
            }),
        )
    }

    pub fn payout_paid(payout_id: &PayoutId, withdrawal_id: Option<WithdrawalId>) -> Vec<u8> {
        envelope(
            PAYOUT_PAID,
            json!({
                "id": payout_id.as_str(),
                "object": "payout",
                "status": "paid",
                "metadata": payout_metadata(withdrawal_id),
            }),
        )
    }

    pub fn payout_failed(
        payout_id: &PayoutId,
        withdrawal_id: Option<WithdrawalId>,
        failure_code: &str,
        failure_message: &str,
    ) -> Vec<u8> {
        envelope(
            PAYOUT_FAILED,
            json!({
                "id": payout_id.as_str(),
                "object": "payout",
                "status": "failed",
                "metadata": payout_metadata(withdrawal_id),
                "failure_code": failure_code,
                "failure_message": failure_message,
            }),
        )
    }

    pub fn unknown(event_type: &str) -> Vec<u8> {
        envelope(event_type, json!({ "id": "obj_1" }))
    }

    fn payout_metadata(withdrawal_id: Option<WithdrawalId>) -> serde_json::Value {
        match withdrawal_id {
            Some(id) => json!({ "withdrawal_id": id.to_string() }),
            None => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_updated() {
        let org = OrganizationId::new("org_dev");
        let caps = AccountCapabilities {
            onboarding_completed: true,
            payouts_enabled: true,
            charges_enabled: false,
        };
        let payload = fixtures::account_updated(&ProviderAccountId::new("acct_1"), Some(&org), caps);

        let event = WebhookEvent::parse(&payload).unwrap();
        assert_eq!(event.event_type, ACCOUNT_UPDATED);
        assert!(event.created.is_some());
        assert_eq!(
            event.kind,
            EventKind::AccountUpdated {
                account_id: ProviderAccountId::new("acct_1"),
                organization_id: Some(org),
                capabilities: caps,
            }
        );
    }

    #[test]
    fn test_parse_payout_failed_reason() {
        let withdrawal_id = WithdrawalId::new();
        let payload = fixtures::payout_failed(
            &PayoutId::new("po_1"),
            Some(withdrawal_id),
            "account_closed",
            "The bank account has been closed",
        );

        match WebhookEvent::parse(&payload).unwrap().kind {
            EventKind::PayoutFailed {
                withdrawal_id: id,
                reason,
                ..
            } => {
                assert_eq!(id, Some(withdrawal_id));
                assert_eq!(reason, "account_closed: The bank account has been closed");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_missing_or_bad_withdrawal_id_is_none() {
        let payload = fixtures::payout_paid(&PayoutId::new("po_1"), None);
        assert_eq!(
            WebhookEvent::parse(&payload).unwrap().kind,
            EventKind::PayoutPaid {
                payout_id: PayoutId::new("po_1"),
                withdrawal_id: None,
            }
        );

        let payload = br#"{"id":"evt_1","type":"payout.paid","data":{"object":{"id":"po_1","metadata":{"withdrawal_id":"not-a-uuid"}}}}"#;
        assert!(matches!(
            WebhookEvent::parse(payload).unwrap().kind,
            EventKind::PayoutPaid {
                withdrawal_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_and_garbage() {
        let event = WebhookEvent::parse(&fixtures::unknown("charge.refunded")).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);

        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(LedgerError::InvalidPayload(_))
        ));
    }
}
