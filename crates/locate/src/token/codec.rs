//! Compact signed claim tokens.
//!
//! Token format: `base64url(header).base64url(claims).base64url(signature)`
//! with an EdDSA header, the same layout as a JWS compact serialization.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::Signature;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ClaimError;
use super::keys::{ClaimSigner, TrustedKey};

const ALG_EDDSA: &str = "EdDSA";

/// Claim set carried by access and monitoring tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Audience (a single string on the wire when there is one entry)
    #[serde(with = "audience")]
    pub aud: Vec<String>,
    /// Subject: target machine for access claims, monitoring identity otherwise
    pub sub: String,
    /// Issued-at (unix seconds)
    #[serde(default)]
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Requested service, access claims only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Issuer and audience a verifier requires
#[derive(Debug, Clone)]
pub struct Expected {
    pub issuer: String,
    pub audience: String,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

/// Serialize and sign `claims`
pub fn sign(claims: &Claims, signer: &dyn ClaimSigner) -> Result<String, ClaimError> {
    let header = Header {
        alg: ALG_EDDSA.to_string(),
        typ: Some("JWT".to_string()),
        kid: Some(signer.key_id().to_string()),
    };

    let header = serde_json::to_vec(&header).map_err(|e| ClaimError::Signing(e.to_string()))?;
    let payload = serde_json::to_vec(claims).map_err(|e| ClaimError::Signing(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = signer.sign(signing_input.as_bytes())?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify `token` as of `now` (unix seconds).
///
/// Every trusted key is tried before reporting `InvalidSignature`. A token
/// whose `exp` equals `now` is expired.
pub fn verify_at(
    token: &str,
    keys: &[TrustedKey],
    expected: &Expected,
    now: i64,
) -> Result<Claims, ClaimError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimError::Malformed("expected three segments".to_string()));
    };

    let header: Header = decode_json(header_b64)?;
    if header.alg != ALG_EDDSA {
        return Err(ClaimError::Malformed(format!("unsupported alg {}", header.alg)));
    }

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| ClaimError::Malformed("invalid signature encoding".to_string()))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| ClaimError::Malformed("invalid signature length".to_string()))?;

    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    if !keys.iter().any(|key| key.verify(signing_input.as_bytes(), &signature)) {
        return Err(ClaimError::InvalidSignature);
    }

    let claims: Claims = decode_json(payload_b64)?;

    if now >= claims.exp {
        return Err(ClaimError::Expired { exp: claims.exp, now });
    }
    if claims.iss != expected.issuer {
        return Err(ClaimError::ClaimMismatch(format!("issuer {}", claims.iss)));
    }
    if !claims.aud.iter().any(|aud| *aud == expected.audience) {
        return Err(ClaimError::ClaimMismatch(format!("audience {:?}", claims.aud)));
    }

    Ok(claims)
}

fn decode_json<T: DeserializeOwned>(segment: &str) -> Result<T, ClaimError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| ClaimError::Malformed("invalid segment encoding".to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ClaimError::Malformed(e.to_string()))
}

mod audience {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S: Serializer>(aud: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match aud {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(aud) => vec![aud],
            OneOrMany::Many(aud) => aud,
        })
    }
}
