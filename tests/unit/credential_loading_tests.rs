//! Unit tests for API token resolution.
//!
//! The keychain service `netlify-dev` is assumed absent in test
//! environments, so resolution falls through to the environment variable.
//! These tests mutate process-global env vars and run serially.

use netlify_dev::auth::credentials::{
    load_auth_token, Authenticator, CredentialAuthenticator, TOKEN_ENV,
};
use netlify_dev::AppError;

#[tokio::test]
#[serial_test::serial]
async fn explicit_token_wins() {
    std::env::set_var(TOKEN_ENV, "from-env");
    let token = load_auth_token(Some("from-flag")).await.unwrap();
    assert_eq!(token, "from-flag");
    std::env::remove_var(TOKEN_ENV);
}

#[tokio::test]
#[serial_test::serial]
async fn env_var_is_the_fallback() {
    std::env::set_var(TOKEN_ENV, "from-env");
    let token = load_auth_token(None).await.unwrap();
    assert_eq!(token, "from-env");

    let token = load_auth_token(Some("")).await.unwrap();
    assert_eq!(token, "from-env", "empty explicit value is ignored");
    std::env::remove_var(TOKEN_ENV);
}

#[tokio::test]
#[serial_test::serial]
async fn missing_token_names_the_env_var() {
    std::env::remove_var(TOKEN_ENV);
    let err = load_auth_token(None).await.unwrap_err();
    assert!(matches!(err, AppError::Auth(_)));
    assert!(err.to_string().contains(TOKEN_ENV), "got: {err}");
}

#[tokio::test]
#[serial_test::serial]
async fn authenticator_rereads_the_environment() {
    let authenticator = CredentialAuthenticator::new(None);
    std::env::set_var(TOKEN_ENV, "first");
    assert_eq!(authenticator.authenticate().await.unwrap(), "first");
    std::env::set_var(TOKEN_ENV, "second");
    assert_eq!(authenticator.authenticate().await.unwrap(), "second");
    std::env::remove_var(TOKEN_ENV);
}
