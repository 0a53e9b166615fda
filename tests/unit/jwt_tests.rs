//! Unit tests for the signed graph credential.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use netlify_dev::auth::jwt::sign_graph_token;
use netlify_dev::auth::GraphAuthConfig;
use netlify_dev::AppError;
use serde_json::Value;
use sha2::Sha256;

fn config(token_id: &str) -> GraphAuthConfig {
    GraphAuthConfig {
        netlify_token: "nf-token".into(),
        authlify_token_id: token_id.into(),
        site_id: "site-1".into(),
    }
}

fn decode_segment(segment: &str) -> Value {
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}

#[test]
fn token_has_hs256_header_and_claims() {
    let token = sign_graph_token(&config("tok-1"), 1_700_000_000).unwrap();
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3);

    let header = decode_segment(parts[0]);
    assert_eq!(header["alg"], "HS256");
    assert_eq!(header["typ"], "JWT");

    let claims = decode_segment(parts[1]);
    assert_eq!(claims["netlify_token"], "nf-token");
    assert_eq!(claims["authlify_token_id"], "tok-1");
    assert_eq!(claims["site_id"], "site-1");
    assert_eq!(claims["iat"], 1_700_000_000);
}

#[test]
fn signature_is_keyed_by_token_id() {
    let token = sign_graph_token(&config("tok-1"), 42).unwrap();
    let (signing_input, signature) = token.rsplit_once('.').unwrap();

    let mut mac = Hmac::<Sha256>::new_from_slice(b"tok-1").unwrap();
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&URL_SAFE_NO_PAD.decode(signature).unwrap())
        .unwrap();
}

#[test]
fn rotated_token_id_changes_the_credential() {
    let first = sign_graph_token(&config("tok-1"), 42).unwrap();
    let second = sign_graph_token(&config("tok-2"), 42).unwrap();
    assert_ne!(first, second);
}

#[test]
fn empty_token_id_is_rejected() {
    let err = sign_graph_token(&config(""), 42).unwrap_err();
    assert!(matches!(err, AppError::Auth(_)));
}
