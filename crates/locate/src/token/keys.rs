//! Ed25519 key material for signing and verifying claims.
//!
//! Private keys are 32-byte seeds, public keys are 32-byte points; both are
//! exchanged as unpadded base64url. The key id (`kid`) is derived from the
//! public key so issuers and verifiers agree on it without coordination.

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::ClaimError;

/// Produces signatures over a claim's signing input.
///
/// The in-process implementation is [`Ed25519Signer`]; a signer backed by a
/// remote key-management service implements the same trait.
pub trait ClaimSigner: Send + Sync {
    /// Identifier placed in the token header
    fn key_id(&self) -> &str;

    /// Sign `message`, returning the raw signature bytes
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ClaimError>;
}

/// Signer holding an Ed25519 private key in memory
pub struct Ed25519Signer {
    key: SigningKey,
    kid: String,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        let kid = key_id(&key.verifying_key());
        Self { key, kid }
    }

    /// Generate an ephemeral key (changes on restart)
    pub fn generate() -> Self {
        use rand_core::OsRng;
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Load a key from a base64url-encoded 32-byte seed
    pub fn from_b64(seed_b64: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(seed_b64.trim())
            .context("Failed to decode signer key")?;
        Self::from_seed(&bytes)
    }

    /// Load a key from a file holding the raw 32-byte seed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).context("Failed to read signer key file")?;
        Self::from_seed(&bytes)
    }

    fn from_seed(bytes: &[u8]) -> Result<Self> {
        let Ok(seed) = <[u8; 32]>::try_from(bytes) else {
            bail!("Invalid signer key length (expected 32 bytes, got {})", bytes.len());
        };
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    /// Public half of this signer, as a verifier would hold it
    pub fn trusted_key(&self) -> TrustedKey {
        TrustedKey::new(self.key.verifying_key())
    }
}

impl ClaimSigner for Ed25519Signer {
    fn key_id(&self) -> &str {
        &self.kid
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ClaimError> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// A public key trusted to validate claims
#[derive(Clone, Debug)]
pub struct TrustedKey {
    key: VerifyingKey,
    kid: String,
}

impl TrustedKey {
    pub fn new(key: VerifyingKey) -> Self {
        let kid = key_id(&key);
        Self { key, kid }
    }

    /// Parse a base64url-encoded 32-byte public key
    pub fn from_b64(pubkey_b64: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(pubkey_b64.trim())
            .context("Failed to decode public key")?;

        let Ok(bytes) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            bail!("Invalid public key length (expected 32 bytes, got {})", bytes.len());
        };

        let key = VerifyingKey::from_bytes(&bytes).context("Invalid public key")?;
        Ok(Self::new(key))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public key as base64url
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.key.as_bytes())
    }

    /// Check `signature` over `message` with this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.key.verify(message, signature).is_ok()
    }
}

/// Key id: first 12 bytes of SHA-256 over the public key, base64url
pub fn key_id(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trusted_key_b64_roundtrip() {
        let signer = Ed25519Signer::generate();
        let trusted = signer.trusted_key();

        let parsed = TrustedKey::from_b64(&trusted.to_b64()).unwrap();
        assert_eq!(parsed.kid(), signer.key_id());
    }

    #[test]
    fn test_signer_from_seed() {
        let seed = URL_SAFE_NO_PAD.encode([7u8; 32]);
        let a = Ed25519Signer::from_b64(&seed).unwrap();
        let b = Ed25519Signer::from_b64(&seed).unwrap();
        assert_eq!(a.key_id(), b.key_id());

        let short = URL_SAFE_NO_PAD.encode([7u8; 16]);
        assert!(Ed25519Signer::from_b64(&short).is_err());
    }

    #[test]
    fn test_rejects_bad_public_key() {
        assert!(TrustedKey::from_b64("not base64!").is_err());
        assert!(TrustedKey::from_b64(&URL_SAFE_NO_PAD.encode([1u8; 31])).is_err());
    }
}
