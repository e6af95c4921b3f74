//! Identifier types for MarketPay entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generated identifiers backed by a time-ordered UUID (v7).
macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Identifiers assigned by someone else (the caller or the payout provider).
macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for a developer wallet.
    WalletId
);

uuid_identifier!(
    /// Unique identifier for a withdrawal request.
    WithdrawalId
);

uuid_identifier!(
    /// Unique identifier for a function-execution transaction.
    TransactionId
);

uuid_identifier!(
    /// Unique identifier for a payer's funding account.
    PayerAccountId
);

string_identifier!(
    /// Organization identifier, resolved by the caller's authentication layer.
    ///
    /// Each organization owns at most one wallet and at most one payer account.
    OrganizationId
);

string_identifier!(
    /// Marketplace function whose execution is being paid for.
    FunctionId
);

string_identifier!(
    /// Connected account reference issued by the payout provider.
    ProviderAccountId
);

string_identifier!(
    /// Payout reference issued by the payout provider.
    PayoutId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_time_ordered() {
        let first = WithdrawalId::new();
        let second = WithdrawalId::new();
        assert_ne!(first, second);
        assert!(first <= second);
    }

    #[test]
    fn test_parse_roundtrips_display() {
        let id = WalletId::new();
        let parsed = WalletId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(WalletId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_string_identifier_serializes_transparently() {
        let org = OrganizationId::new("org_42");
        assert_eq!(serde_json::to_string(&org).unwrap(), "\"org_42\"");
        assert_eq!(org.as_str(), "org_42");
        assert_eq!(OrganizationId::from("org_42"), org);
    }
}
