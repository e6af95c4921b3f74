//! Webhook signature signing and verification.
//!
//! Providers sign each delivery with a header of the form
//! `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`, where the MAC is
//! HMAC-SHA256 over `"<t>.<raw body>"` keyed with the endpoint secret.
//! Several `v1` entries may be present while a secret is being rolled.

use chrono::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "v1";

/// Parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parse a `t=...,v1=...` header. Unknown schemes are skipped.
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(CryptoError::MalformedHeader(format!(
                    "expected key=value, got {part:?}"
                )));
            };
            match key {
                "t" => {
                    let ts = value.parse::<i64>().map_err(|_| {
                        CryptoError::MalformedHeader(format!("bad timestamp {value:?}"))
                    })?;
                    timestamp = Some(ts);
                }
                SCHEME => {
                    // A non-hex entry can never match; skip it rather than fail
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| CryptoError::MalformedHeader("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(CryptoError::MalformedHeader(format!(
                "no {SCHEME} signatures"
            )));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies (and, for tests and simulations, produces) webhook signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Create a verifier for an endpoint secret.
    pub fn new(secret: impl AsRef<[u8]>, tolerance: Duration) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey("webhook secret is empty".into()));
        }
        Ok(Self {
            secret: secret.to_vec(),
            tolerance,
        })
    }

    /// Verify a payload against its signature header using the current time.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify a payload against its signature header at a given time.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let parsed = SignatureHeader::parse(header)?;

        let age = now.saturating_sub(parsed.timestamp).abs();
        if age > self.tolerance.num_seconds() {
            return Err(CryptoError::TimestampOutsideTolerance {
                timestamp: parsed.timestamp,
                tolerance_secs: self.tolerance.num_seconds(),
            });
        }

        let expected = self.compute(parsed.timestamp, payload)?;
        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

        if matched {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature)
        }
    }

    /// Produce a signature header for a payload at a given timestamp.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let mac = self.compute(timestamp, payload)?;
        Ok(format!("t={},{}={}", timestamp, SCHEME, hex::encode(mac)))
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", Duration::minutes(5)).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let v = verifier();
        let payload = br#"{"type":"payout.paid"}"#;
        let header = v.sign(payload, NOW).unwrap();

        assert!(header.starts_with("t=1700000000,v1="));
        assert!(v.verify_at(payload, &header, NOW + 10).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let v = verifier();
        let header = v.sign(b"original", NOW).unwrap();
        assert_eq!(
            v.verify_at(b"tampered", &header, NOW),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = verifier().sign(b"body", NOW).unwrap();
        let other = WebhookVerifier::new("whsec_other", Duration::minutes(5)).unwrap();
        assert_eq!(
            other.verify_at(b"body", &header, NOW),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let v = verifier();
        let header = v.sign(b"body", NOW).unwrap();
        assert!(matches!(
            v.verify_at(b"body", &header, NOW + 301),
            Err(CryptoError::TimestampOutsideTolerance { .. })
        ));
    }

    #[test]
    fn test_any_matching_signature_accepted() {
        let v = verifier();
        let good = v.sign(b"body", NOW).unwrap();
        let good_sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v0=ignored,v1={good_sig}");
        assert!(v.verify_at(b"body", &header, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            SignatureHeader::parse("v1=abcd"),
            Err(CryptoError::MalformedHeader(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=123"),
            Err(CryptoError::MalformedHeader(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("garbage"),
            Err(CryptoError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(WebhookVerifier::new("", Duration::minutes(5)).is_err());
    }
}
