//! Access token issuance and monitoring token verification.
//!
//! Access tokens are minted per (service, target) for clients; monitoring
//! tokens are presented by the monitoring subsystem and verified against a
//! set of trusted public keys.

mod codec;
mod issuer;
mod keys;
mod verifier;

pub use issuer::TokenIssuer;
pub use keys::{ClaimSigner, Ed25519Signer, TrustedKey};
pub use verifier::TokenVerifier;

#[cfg(test)]
pub use codec::{Claims, Expected, sign, verify_at};

use thiserror::Error;

/// Claim signing and verification failures.
///
/// Every verification variant maps to the same unauthorized response so
/// callers cannot tell which check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// The signing key is unavailable or unusable
    #[error("signing failed: {0}")]
    Signing(String),

    /// The token could not be parsed
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No trusted key validates the signature
    #[error("invalid signature")]
    InvalidSignature,

    /// The token expired
    #[error("token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },

    /// Issuer or audience differ from the expected values
    #[error("claim mismatch: {0}")]
    ClaimMismatch(String),
}
