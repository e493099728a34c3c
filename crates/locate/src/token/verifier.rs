//! Monitoring token verification.

use super::ClaimError;
use super::codec::{self, Expected};
use super::keys::TrustedKey;

/// Verifies monitoring tokens against the trusted keys loaded at startup.
pub struct TokenVerifier {
    keys: Vec<TrustedKey>,
    expected: Expected,
}

impl TokenVerifier {
    pub fn new(keys: Vec<TrustedKey>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        if keys.is_empty() {
            tracing::warn!("No monitoring verify keys configured; all monitoring requests will be rejected");
        }

        Self {
            keys,
            expected: Expected {
                issuer: issuer.into(),
                audience: audience.into(),
            },
        }
    }

    /// Verify a monitoring token and return its subject as the caller identity
    pub fn verify_monitoring(&self, token: &str) -> Result<String, ClaimError> {
        self.verify_monitoring_at(token, chrono::Utc::now().timestamp())
    }

    pub fn verify_monitoring_at(&self, token: &str, now: i64) -> Result<String, ClaimError> {
        let claims = codec::verify_at(token, &self.keys, &self.expected, now)?;
        Ok(claims.sub)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Claims;
    use crate::token::keys::Ed25519Signer;

    fn monitoring_token(signer: &Ed25519Signer, exp: i64) -> String {
        let claims = Claims {
            iss: "monitoring".to_string(),
            aud: vec!["locate".to_string()],
            sub: "e2e-prober".to_string(),
            iat: 0,
            exp,
            scope: None,
        };
        codec::sign(&claims, signer).unwrap()
    }

    #[test]
    fn test_verify_monitoring_returns_subject() {
        let signer = Ed25519Signer::generate();
        let verifier = TokenVerifier::new(vec![signer.trusted_key()], "monitoring", "locate");

        let token = monitoring_token(&signer, 2_000);
        assert_eq!(verifier.verify_monitoring_at(&token, 1_000).unwrap(), "e2e-prober");
        assert_eq!(verifier.key_count(), 1);
    }

    #[test]
    fn test_verify_monitoring_rejects_expired() {
        let signer = Ed25519Signer::generate();
        let verifier = TokenVerifier::new(vec![signer.trusted_key()], "monitoring", "locate");

        let token = monitoring_token(&signer, 1_000);
        assert!(matches!(
            verifier.verify_monitoring_at(&token, 1_000),
            Err(ClaimError::Expired { .. })
        ));
    }

    #[test]
    fn test_access_token_is_not_a_monitoring_token() {
        let signer = Ed25519Signer::generate();
        let verifier = TokenVerifier::new(vec![signer.trusted_key()], "monitoring", "locate");

        let claims = Claims {
            iss: "locate".to_string(),
            aud: vec!["platform".to_string()],
            sub: "mlab1-lga03".to_string(),
            iat: 0,
            exp: 2_000,
            scope: Some("ndt/ndt7".to_string()),
        };
        let token = codec::sign(&claims, &signer).unwrap();
        assert!(matches!(
            verifier.verify_monitoring_at(&token, 1_000),
            Err(ClaimError::ClaimMismatch(_))
        ));
    }
}
