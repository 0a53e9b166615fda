//! Remote collaborative-session API.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{decode, ensure_success};
use crate::auth::SharedAuth;
use crate::models::session::{GraphSession, SessionEvent};
use crate::{AppError, Result};

/// Interval between two polls of a session's event feed.
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Boxed future returned by [`GraphClient`] operations.
pub type GraphFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations against the remote session service.
pub trait GraphClient: Send + Sync {
    /// Make sure the site has a graph app provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote call fails.
    fn ensure_app_for_site<'a>(&'a self, site_id: &'a str) -> GraphFuture<'a, ()>;

    /// Start a new session and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote call fails.
    fn create_session<'a>(&'a self, site_id: &'a str) -> GraphFuture<'a, String>;

    /// Look up a session by id. Unknown sessions yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote call fails.
    fn get_session<'a>(&'a self, session_id: &'a str) -> GraphFuture<'a, Option<GraphSession>>;

    /// Follow the session's remote event feed until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error when the feed cannot be followed at all.
    fn watch_session<'a>(
        &'a self,
        session_id: &'a str,
        cancel: CancellationToken,
    ) -> GraphFuture<'a, ()>;

    /// Store the operations document against a session.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote call fails.
    fn persist_document<'a>(
        &'a self,
        site_id: &'a str,
        session_id: &'a str,
        document: &'a str,
    ) -> GraphFuture<'a, ()>;

    /// Mark a session as no longer in use.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote call fails.
    fn mark_session_inactive<'a>(&'a self, session_id: &'a str) -> GraphFuture<'a, ()>;
}

/// [`GraphClient`] over the hosting API.
///
/// Requests carry the signed graph credential from the shared auth state
/// when one has been injected, otherwise the plain API token.
#[derive(Debug, Clone)]
pub struct HttpGraphClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    auth: SharedAuth,
    poll_interval: Duration,
}

impl HttpGraphClient {
    /// Client rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>, auth: SharedAuth) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
            auth,
            poll_interval: EVENT_POLL_INTERVAL,
        }
    }

    /// Override the event feed poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "graph request");
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        let graph_token = self.auth.read().await.graph_token.clone();
        match graph_token.or_else(|| self.token.clone()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_events(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        let path = format!("/graph/sessions/{session_id}/events");
        let response = self.request(Method::GET, &path).await.send().await?;
        decode(response, &path).await
    }

    async fn ack_events(&self, session_id: &str, events: &[SessionEvent]) -> Result<()> {
        let path = format!("/graph/sessions/{session_id}/events/ack");
        let ids: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
        let response = self
            .request(Method::POST, &path)
            .await
            .json(&json!({ "eventIds": ids }))
            .send()
            .await?;
        ensure_success(response, &path).await
    }

    async fn follow(&self, session_id: &str, cancel: CancellationToken) -> Result<()> {
        info!(session_id, "watching graph session events");
        loop {
            match self.fetch_events(session_id).await {
                Ok(events) if events.is_empty() => {}
                Ok(events) => {
                    for event in &events {
                        info!(session_id, event = %event.kind, id = %event.id, "graph session event");
                    }
                    if let Err(err) = self.ack_events(session_id, &events).await {
                        warn!(%err, session_id, "failed to acknowledge graph session events");
                    }
                }
                Err(err) => warn!(%err, session_id, "failed to fetch graph session events"),
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(session_id, "graph session watcher stopped");
        Ok(())
    }
}

impl GraphClient for HttpGraphClient {
    fn ensure_app_for_site<'a>(&'a self, site_id: &'a str) -> GraphFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/sites/{site_id}/graph/app");
            let response = self
                .request(Method::POST, &path)
                .await
                .json(&json!({}))
                .send()
                .await?;
            ensure_success(response, &path).await
        })
    }

    fn create_session<'a>(&'a self, site_id: &'a str) -> GraphFuture<'a, String> {
        Box::pin(async move {
            let path = format!("/sites/{site_id}/graph/sessions");
            let response = self
                .request(Method::POST, &path)
                .await
                .json(&json!({ "name": format!("netlify-dev:{site_id}") }))
                .send()
                .await?;
            let session: GraphSession = decode(response, &path).await?;
            Ok(session.id)
        })
    }

    fn get_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> GraphFuture<'a, Option<GraphSession>> {
        Box::pin(async move {
            let path = format!("/graph/sessions/{session_id}");
            let response = self.request(Method::GET, &path).await.send().await?;
            match decode(response, &path).await {
                Ok(session) => Ok(Some(session)),
                Err(AppError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn watch_session<'a>(
        &'a self,
        session_id: &'a str,
        cancel: CancellationToken,
    ) -> GraphFuture<'a, ()> {
        Box::pin(self.follow(session_id, cancel))
    }

    fn persist_document<'a>(
        &'a self,
        site_id: &'a str,
        session_id: &'a str,
        document: &'a str,
    ) -> GraphFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/sites/{site_id}/graph/sessions/{session_id}/document");
            let response = self
                .request(Method::PUT, &path)
                .await
                .json(&json!({ "document": document }))
                .send()
                .await?;
            ensure_success(response, &path).await
        })
    }

    fn mark_session_inactive<'a>(&'a self, session_id: &'a str) -> GraphFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/graph/sessions/{session_id}");
            let response = self
                .request(Method::PATCH, &path)
                .await
                .json(&json!({ "status": "inactive" }))
                .send()
                .await?;
            ensure_success(response, &path).await
        })
    }
}
