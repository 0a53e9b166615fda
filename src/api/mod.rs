//! Hosting API client.
//!
//! Thin `reqwest` wrapper over the handful of endpoints the orchestrator
//! needs: site lookup (auth polling), add-on URLs (proxy routing) and live
//! tunnel sessions.

use std::future::Future;
use std::pin::Pin;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::poller::SiteInfoSource;
use crate::models::site::{LiveSession, ServiceInstance, SiteInfo};
use crate::{AppError, Result};

/// Production API root.
pub const DEFAULT_API_URL: &str = "https://api.netlify.com/api/v1";

/// Environment variable overriding [`DEFAULT_API_URL`].
pub const API_URL_ENV: &str = "NETLIFY_API_URL";

/// Authenticated hosting API client.
#[derive(Debug, Clone)]
pub struct NetlifyApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl NetlifyApi {
    /// Client for `base_url` using `token` as bearer credential.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    /// Client for the API root from the environment (or the default root).
    #[must_use]
    pub fn from_env(token: Option<String>) -> Self {
        let base_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        Self::new(base_url, token)
    }

    /// Bearer token, if authenticated.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// API root without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current site snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sites and `AppError::Api`
    /// for transport or other HTTP failures.
    pub async fn get_site(&self, site_id: &str) -> Result<SiteInfo> {
        let path = format!("/sites/{site_id}");
        let response = self.request(Method::GET, &path).send().await?;
        decode(response, &path).await
    }

    /// List add-on instances attached to the site.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` on transport or HTTP failure.
    pub async fn list_service_instances(&self, site_id: &str) -> Result<Vec<ServiceInstance>> {
        let path = format!("/sites/{site_id}/service-instances");
        let response = self.request(Method::GET, &path).send().await?;
        decode(response, &path).await
    }

    /// Create a public tunnel session for the site.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` on transport or HTTP failure.
    pub async fn create_live_session(&self, site_id: &str) -> Result<LiveSession> {
        let path = format!("/live_sessions?site_id={site_id}");
        let response = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        decode(response, &path).await
    }

    /// Fetch the state of a tunnel session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions and `AppError::Api`
    /// for other failures.
    pub async fn get_live_session(&self, session_id: &str) -> Result<LiveSession> {
        let path = format!("/live_sessions/{session_id}");
        let response = self.request(Method::GET, &path).send().await?;
        decode(response, &path).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "api request");
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Decode a JSON response body, mapping error statuses to [`AppError`].
pub(crate) async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T> {
    check_status(response, path)
        .await?
        .json::<T>()
        .await
        .map_err(|err| AppError::Api(format!("invalid response from {path}: {err}")))
}

/// Map an error status to [`AppError`], discarding any success body.
pub(crate) async fn ensure_success(response: Response, path: &str) -> Result<()> {
    check_status(response, path).await.map(|_response| ())
}

async fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(format!("{path} returned 404")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Api(format!("{path} returned {status}: {body}")));
    }
    Ok(response)
}

impl SiteInfoSource for NetlifyApi {
    fn get_site<'a>(
        &'a self,
        site_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SiteInfo>> + Send + 'a>> {
        Box::pin(NetlifyApi::get_site(self, site_id))
    }
}
