//! Auth token loading.
//!
//! The hosting API token is resolved from an explicit value, then the OS
//! keychain, then the `NETLIFY_AUTH_TOKEN` environment variable.

use std::env;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::{AppError, Result};

/// Keychain service name.
pub const KEYRING_SERVICE: &str = "netlify-dev";
/// Keychain entry holding the API token.
pub const TOKEN_KEY: &str = "netlify_auth_token";
/// Environment variable fallback for the API token.
pub const TOKEN_ENV: &str = "NETLIFY_AUTH_TOKEN";

/// Produces a fresh API token on demand.
pub trait Authenticator: Send + Sync {
    /// Obtain a currently valid token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Auth` when no token can be obtained.
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// Authenticator re-reading the keychain / environment on every call, so a
/// token rotated while the orchestrator runs is picked up.
#[derive(Debug, Clone, Default)]
pub struct CredentialAuthenticator {
    explicit: Option<String>,
}

impl CredentialAuthenticator {
    /// Authenticator preferring `explicit` when it is non-empty.
    #[must_use]
    pub fn new(explicit: Option<String>) -> Self {
        Self {
            explicit: explicit.filter(|token| !token.is_empty()),
        }
    }
}

impl Authenticator for CredentialAuthenticator {
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(load_auth_token(self.explicit.as_deref()))
    }
}

/// Resolve the API token.
///
/// # Errors
///
/// Returns `AppError::Auth` if neither the explicit value, the keychain
/// nor the environment provide a token.
pub async fn load_auth_token(explicit: Option<&str>) -> Result<String> {
    if let Some(token) = explicit.filter(|token| !token.is_empty()) {
        debug!("using explicit auth token");
        return Ok(token.to_owned());
    }

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(|| {
        keyring::Entry::new(KEYRING_SERVICE, TOKEN_KEY).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Auth(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = TOKEN_KEY, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            debug!(key = TOKEN_KEY, ?err, "keychain lookup failed, trying env var");
        }
    }

    env::var(TOKEN_ENV)
        .ok()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Auth(format!(
                "auth token not found in keychain or {TOKEN_ENV} env var"
            ))
        })
}
