//! Signed graph credential.
//!
//! The credential injected for downstream functions is an HS256 JWT keyed
//! by the site's current authentication token id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use super::GraphAuthConfig;
use crate::{AppError, Result};

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    netlify_token: &'a str,
    authlify_token_id: &'a str,
    site_id: &'a str,
    iat: i64,
}

/// Build the signed credential for `config`, issued at `issued_at`
/// (seconds since the epoch).
///
/// # Errors
///
/// Returns `AppError::Auth` if the authentication token id is empty.
pub fn sign_graph_token(config: &GraphAuthConfig, issued_at: i64) -> Result<String> {
    if config.authlify_token_id.is_empty() {
        return Err(AppError::Auth("cannot sign graph token without a token id".into()));
    }

    let header = encode_segment(&Header {
        alg: "HS256",
        typ: "JWT",
    })?;
    let claims = encode_segment(&Claims {
        netlify_token: &config.netlify_token,
        authlify_token_id: &config.authlify_token_id,
        site_id: &config.site_id,
        iat: issued_at,
    })?;
    let signing_input = format!("{header}.{claims}");

    let mut mac = Hmac::<Sha256>::new_from_slice(config.authlify_token_id.as_bytes())
        .map_err(|err| AppError::Auth(format!("invalid signing key: {err}")))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|err| AppError::Auth(format!("failed to encode token segment: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}
