//! Recurring API-authentication refresh.
//!
//! Every [`POLL_INTERVAL`] the poller fetches the site snapshot and compares
//! its authentication token id with the one cached in [`AuthContext`]. A new
//! id triggers re-authentication and injection of a freshly signed graph
//! credential; an empty id clears the cached configuration. Each iteration
//! is isolated: an error or panic is logged and the next tick still runs.
//!
//! [`AuthContext`]: super::AuthContext

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::credentials::Authenticator;
use super::jwt::sign_graph_token;
use super::{AuthContext, GraphAuthConfig, SharedAuth};
use crate::exports::{EnvExports, NETLIFY_GRAPH_TOKEN, ONEGRAPH_AUTHLIFY_TOKEN};
use crate::models::site::SiteInfo;
use crate::Result;

/// Interval between two auth checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Source of site snapshots.
pub trait SiteInfoSource: Send + Sync {
    /// Fetch the current snapshot of `site_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be fetched.
    fn get_site<'a>(
        &'a self,
        site_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SiteInfo>> + Send + 'a>>;
}

/// Effect of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    /// Nothing changed.
    Unchanged,
    /// A new token id was observed and credentials were re-injected.
    Refreshed,
    /// The token id disappeared and cached credentials were dropped.
    Cleared,
}

/// Auth refresh poller for one site.
pub struct AuthPoller {
    site_id: String,
    source: Arc<dyn SiteInfoSource>,
    authenticator: Arc<dyn Authenticator>,
    auth: SharedAuth,
    exports: EnvExports,
    interval: Duration,
}

impl AuthPoller {
    /// Poller for `site_id`, writing into `auth` and `exports`.
    #[must_use]
    pub fn new(
        site_id: impl Into<String>,
        source: Arc<dyn SiteInfoSource>,
        authenticator: Arc<dyn Authenticator>,
        auth: SharedAuth,
        exports: EnvExports,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            source,
            authenticator,
            auth,
            exports,
            interval: POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one check. `snapshot` is used instead of fetching when given.
    ///
    /// # Errors
    ///
    /// Propagates site lookup, authentication and signing failures.
    pub async fn poll_once(&self, snapshot: Option<SiteInfo>) -> Result<AuthChange> {
        let site = match snapshot {
            Some(site) => site,
            None => self.source.get_site(&self.site_id).await?,
        };
        let remote_id = site.auth_token_id().map(str::to_owned);
        let cached_id = self.auth.read().await.cached_token_id().map(str::to_owned);

        match remote_id {
            Some(remote_id) if cached_id.as_deref() != Some(remote_id.as_str()) => {
                let netlify_token = self.authenticator.authenticate().await?;
                let config = GraphAuthConfig {
                    netlify_token,
                    authlify_token_id: remote_id,
                    site_id: self.site_id.clone(),
                };
                let token = sign_graph_token(&config, Utc::now().timestamp())?;

                {
                    let mut auth = self.auth.write().await;
                    auth.graph_config = Some(config);
                    auth.graph_token = Some(token.clone());
                }
                self.exports.set(ONEGRAPH_AUTHLIFY_TOKEN, &token);
                self.exports.set(NETLIFY_GRAPH_TOKEN, &token);

                info!(site_id = %self.site_id, "API authentication credentials refreshed");
                Ok(AuthChange::Refreshed)
            }
            Some(_) => Ok(AuthChange::Unchanged),
            None => {
                let mut auth = self.auth.write().await;
                if *auth == AuthContext::default() {
                    return Ok(AuthChange::Unchanged);
                }
                *auth = AuthContext::default();
                drop(auth);
                self.exports.remove(ONEGRAPH_AUTHLIFY_TOKEN);
                self.exports.remove(NETLIFY_GRAPH_TOKEN);

                info!(site_id = %self.site_id, "API authentication disabled; cleared credentials");
                Ok(AuthChange::Cleared)
            }
        }
    }

    /// Run the first iteration inline with `initial`, then keep polling on
    /// a background task until `cancel` fires.
    pub async fn start(
        self,
        initial: Option<SiteInfo>,
        cancel: CancellationToken,
    ) -> AuthPollerHandle {
        self.run_iteration(initial).await;

        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; that iteration already ran.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("auth poller shutting down");
                        break;
                    }
                    _ = interval.tick() => self.run_iteration(None).await,
                }
            }
        });

        AuthPollerHandle { cancel, join }
    }

    async fn run_iteration(&self, snapshot: Option<SiteInfo>) {
        match AssertUnwindSafe(self.poll_once(snapshot)).catch_unwind().await {
            Ok(Ok(change)) => debug!(?change, "auth poll iteration complete"),
            Ok(Err(err)) => warn!(%err, "auth poll iteration failed; retrying on next tick"),
            Err(_panic) => error!("auth poll iteration panicked; retrying on next tick"),
        }
    }
}

/// Handle to a running poller.
#[derive(Debug)]
pub struct AuthPollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl AuthPollerHandle {
    /// Whether the background loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            warn!(%err, "auth poller task ended abnormally");
        }
    }
}
