//! Public key distribution for access token verifiers.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PublicKey {
    kid: String,
    alg: &'static str,
    /// Raw Ed25519 public key, base64url
    key: String,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    keys: Vec<PublicKey>,
}

/// Keys a platform server needs to check access tokens
pub async fn keys(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse {
        keys: vec![PublicKey {
            kid: state.signer_key.kid().to_string(),
            alg: "EdDSA",
            key: state.signer_key.to_b64(),
        }],
    })
}
