//! Per-target access token issuance.

use locate_api::Target;
use std::sync::Arc;
use std::time::Duration;

use super::ClaimError;
use super::codec::{self, Claims};
use super::keys::ClaimSigner;

/// Mints short-lived access tokens binding a client scope to a target machine.
///
/// Holds no per-request state; the signer is read-only after startup, so
/// concurrent calls need no coordination.
pub struct TokenIssuer {
    signer: Arc<dyn ClaimSigner>,
    issuer: String,
    audience: String,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(
        signer: Arc<dyn ClaimSigner>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            signer,
            issuer: issuer.into(),
            audience: audience.into(),
            // A zero TTL would mint tokens that are already expired.
            ttl_secs: ttl.as_secs().clamp(1, i64::MAX as u64) as i64,
        }
    }

    /// Issue an access token for `target`, scoped to `scope`
    pub fn issue(&self, scope: &str, target: &Target) -> Result<(Claims, String), ClaimError> {
        self.issue_at(scope, target, chrono::Utc::now().timestamp())
    }

    /// Issue an access token as of `now` (unix seconds)
    pub fn issue_at(
        &self,
        scope: &str,
        target: &Target,
        now: i64,
    ) -> Result<(Claims, String), ClaimError> {
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: vec![self.audience.clone()],
            sub: target.machine.clone(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            scope: Some(scope.to_string()),
        };

        let token = codec::sign(&claims, self.signer.as_ref())?;

        tracing::trace!(
            machine = %target.machine,
            scope = scope,
            exp = claims.exp,
            "Issued access token"
        );

        Ok((claims, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Expected;
    use crate::token::keys::Ed25519Signer;

    fn target(machine: &str) -> Target {
        Target {
            machine: machine.to_string(),
            urls: vec![],
            site: "lga03".to_string(),
            country: "US".to_string(),
            region: "US-NY".to_string(),
            score: 0.0,
        }
    }

    #[test]
    fn test_issue_binds_subject_and_scope() {
        let signer = Arc::new(Ed25519Signer::generate());
        let trusted = signer.trusted_key();
        let issuer = TokenIssuer::new(signer, "locate", "platform", Duration::from_secs(60));

        let now = 1_700_000_000;
        let (claims, token) = issuer.issue_at("ndt/ndt7", &target("mlab1-lga03"), now).unwrap();

        assert_eq!(claims.sub, "mlab1-lga03");
        assert_eq!(claims.scope.as_deref(), Some("ndt/ndt7"));
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + 60);

        let expected = Expected {
            issuer: "locate".to_string(),
            audience: "platform".to_string(),
        };
        let verified = codec::verify_at(&token, &[trusted], &expected, now).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn test_zero_ttl_never_issues_expired_token() {
        let signer = Arc::new(Ed25519Signer::generate());
        let issuer = TokenIssuer::new(signer, "locate", "platform", Duration::ZERO);

        let (claims, _) = issuer.issue_at("ndt/ndt7", &target("mlab1"), 100).unwrap();
        assert!(claims.exp > 100);
    }

    #[test]
    fn test_signer_failure_propagates() {
        struct Unavailable;
        impl ClaimSigner for Unavailable {
            fn key_id(&self) -> &str {
                "offline"
            }
            fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, ClaimError> {
                Err(ClaimError::Signing("key unavailable".to_string()))
            }
        }

        let issuer = TokenIssuer::new(Arc::new(Unavailable), "locate", "platform", Duration::from_secs(60));
        let result = issuer.issue("ndt/ndt7", &target("mlab1"));
        assert!(matches!(result, Err(ClaimError::Signing(_))));
    }
}
