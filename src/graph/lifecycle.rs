//! Collaborative session lifecycle.
//!
//! [`SessionLifecycle`] moves between [`SessionState::NoSession`] and
//! [`SessionState::Active`]. A config change always stops the current
//! session's remote watcher before a new create-or-resume pass starts, so
//! two sessions never manage the same document at once.
//!
//! [`start_session_manager`] wires the lifecycle to the config file watcher
//! through a single `mpsc` channel and registers the teardown actions with
//! the [`CleanupRegistry`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::client::GraphClient;
use super::state::LocalState;
use crate::cleanup::CleanupRegistry;
use crate::config::{GraphConfig, SiteConfig};
use crate::config_watcher::{ConfigChanged, ConfigLoader, ConfigWatchHandle};
use crate::models::session::SessionState;
use crate::{AppError, Result};

/// Operations document used when the configured one is missing or empty.
pub const DEFAULT_OPERATIONS_DOCUMENT: &str =
    "query ExampleQuery @netlify(doc: \"An example query to start with.\") {\n  __typename\n}\n";

const CONFIG_CHANNEL_CAPACITY: usize = 8;

struct ActiveSession {
    id: String,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

/// Create-or-resume state machine for the site's collaborative session.
pub struct SessionLifecycle {
    client: Arc<dyn GraphClient>,
    state: LocalState,
    registry: CleanupRegistry,
    site_id: String,
    config: GraphConfig,
    active: Option<ActiveSession>,
    registered: HashSet<String>,
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("site_id", &self.site_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionLifecycle {
    /// Lifecycle in the `NoSession` state.
    #[must_use]
    pub fn new(
        client: Arc<dyn GraphClient>,
        state: LocalState,
        registry: CleanupRegistry,
        site_id: impl Into<String>,
        config: GraphConfig,
    ) -> Self {
        Self {
            client,
            state,
            registry,
            site_id: site_id.into(),
            config,
            active: None,
            registered: HashSet::new(),
        }
    }

    /// Current observable state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map_or(SessionState::NoSession, |active| {
                SessionState::Active(active.id.clone())
            })
    }

    /// Configuration the next create-or-resume pass uses.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Establish the active session, resuming the stored one when the remote
    /// side still reports it as active.
    ///
    /// The session id is only reported once the document has been persisted
    /// and the inactive-marking teardown is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if local state cannot be read or written, or any
    /// remote call fails. The state stays `NoSession` in that case.
    pub async fn create_or_resume(&mut self) -> Result<String> {
        let span = info_span!("graph_session", site_id = %self.site_id);
        async {
            if let Some(previous) = self.active.take() {
                stop_watcher(previous).await;
            }

            let stored = self.state.load_session_id()?;
            let document = read_document(&self.config.operations_path).await;
            self.client.ensure_app_for_site(&self.site_id).await?;

            let resumable = match stored {
                Some(id) => match self.client.get_session(&id).await? {
                    Some(session) if session.is_active() => Some(id),
                    Some(_) => {
                        info!(session_id = %id, "stored graph session is inactive");
                        None
                    }
                    None => {
                        info!(session_id = %id, "stored graph session no longer exists");
                        None
                    }
                },
                None => None,
            };
            let session_id = match resumable {
                Some(id) => {
                    info!(session_id = %id, "resuming graph session");
                    id
                }
                None => {
                    let id = self.client.create_session(&self.site_id).await?;
                    self.state.save_session_id(&id)?;
                    info!(session_id = %id, "created graph session");
                    id
                }
            };

            let active = self.spawn_watcher(session_id);
            match self.finish_activation(&active.id, &document).await {
                Ok(()) => {
                    let id = active.id.clone();
                    self.active = Some(active);
                    Ok(id)
                }
                Err(err) => {
                    stop_watcher(active).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// React to a config change: stop the current session, adopt `config`,
    /// then create or resume again.
    ///
    /// # Errors
    ///
    /// Propagates [`SessionLifecycle::create_or_resume`] failures.
    pub async fn handle_config_change(&mut self, config: GraphConfig) -> Result<String> {
        self.stop_active().await;
        self.config = config;
        self.create_or_resume().await
    }

    /// Stop the active session's remote watcher, if any.
    pub async fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            stop_watcher(active).await;
        }
    }

    fn spawn_watcher(&self, session_id: String) -> ActiveSession {
        let cancel = CancellationToken::new();
        let client = Arc::clone(&self.client);
        let watch_cancel = cancel.clone();
        let id = session_id.clone();
        let watcher = tokio::spawn(async move {
            if let Err(err) = client.watch_session(&id, watch_cancel).await {
                warn!(%err, session_id = %id, "graph session watcher failed");
            }
        });
        ActiveSession {
            id: session_id,
            cancel,
            watcher,
        }
    }

    async fn finish_activation(&mut self, watched_id: &str, document: &str) -> Result<()> {
        let session_id = self.state.load_session_id()?.ok_or_else(|| {
            AppError::Session(format!("session {watched_id} was not recorded in local state"))
        })?;
        if session_id != watched_id {
            return Err(AppError::Session(format!(
                "local state changed to {session_id} while activating {watched_id}"
            )));
        }

        self.client
            .persist_document(&self.site_id, &session_id, document)
            .await?;

        if self.registered.insert(session_id.clone()) {
            let client = Arc::clone(&self.client);
            self.registry
                .register("mark graph session inactive", move || async move {
                    client.mark_session_inactive(&session_id).await
                });
        }
        Ok(())
    }
}

async fn stop_watcher(active: ActiveSession) {
    active.cancel.cancel();
    if let Err(err) = active.watcher.await {
        warn!(%err, session_id = %active.id, "graph session watcher ended abnormally");
    }
    debug!(session_id = %active.id, "graph session watcher stopped");
}

async fn read_document(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(document) if !document.trim().is_empty() => document,
        Ok(_) => {
            debug!(path = %path.display(), "operations document empty; using default");
            DEFAULT_OPERATIONS_DOCUMENT.to_owned()
        }
        Err(err) => {
            debug!(%err, path = %path.display(), "operations document unavailable; using default");
            DEFAULT_OPERATIONS_DOCUMENT.to_owned()
        }
    }
}

/// Inputs deciding whether and how the session manager starts.
#[derive(Debug, Clone)]
pub struct SessionManagerOptions {
    /// Running without network access.
    pub offline: bool,
    /// Linked site, if known.
    pub site_id: Option<String>,
    /// Site root.
    pub root: PathBuf,
    /// Site config file to watch.
    pub config_path: PathBuf,
    /// Quiet period for config file events.
    pub debounce: Duration,
}

/// Running session manager.
#[derive(Debug)]
pub struct SessionManager {
    session_id: String,
    sender: mpsc::Sender<ConfigChanged>,
    reactor: JoinHandle<()>,
}

impl SessionManager {
    /// Id of the session established at startup.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sender feeding the config change reactor.
    #[must_use]
    pub fn config_sender(&self) -> mpsc::Sender<ConfigChanged> {
        self.sender.clone()
    }

    /// Whether the reactor has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.reactor.is_finished()
    }
}

/// Start the session manager unless the feature cannot run.
///
/// Offline mode and a missing site id are reported and yield `Ok(None)`
/// without touching any session state.
///
/// # Errors
///
/// Returns an error if the initial session cannot be established or the
/// config file cannot be watched.
pub async fn start_session_manager(
    options: SessionManagerOptions,
    site: &SiteConfig,
    client: Arc<dyn GraphClient>,
    registry: CleanupRegistry,
) -> Result<Option<SessionManager>> {
    if options.offline {
        warn!("Unable to start Netlify Graph in offline mode");
        return Ok(None);
    }
    let Some(site_id) = options.site_id.filter(|id| !id.is_empty()) else {
        error!("No siteId defined, unable to start Netlify Graph");
        return Ok(None);
    };

    let config = GraphConfig::normalize(site, &options.root);
    let mut lifecycle = SessionLifecycle::new(
        client,
        LocalState::for_site_root(&options.root),
        registry.clone(),
        site_id,
        config,
    );
    let session_id = lifecycle.create_or_resume().await?;

    let (sender, receiver) = mpsc::channel(CONFIG_CHANNEL_CAPACITY);
    let root = options.root.clone();
    let loader: ConfigLoader = Arc::new(move |path: &Path| {
        let site = SiteConfig::load_from_path(path)?;
        Ok(GraphConfig::normalize(&site, &root))
    });
    let watch = ConfigWatchHandle::spawn(
        &options.config_path,
        options.debounce,
        loader,
        sender.clone(),
    )?;

    let slot = Arc::new(Mutex::new(Some(watch)));
    registry.register("close config watcher", move || async move {
        if let Some(watch) = slot.lock().await.take() {
            watch.close().await;
        }
        Ok(())
    });

    let reactor = tokio::spawn(react_to_changes(
        lifecycle,
        receiver,
        registry.shutdown_token(),
    ));

    Ok(Some(SessionManager {
        session_id,
        sender,
        reactor,
    }))
}

async fn react_to_changes(
    mut lifecycle: SessionLifecycle,
    mut receiver: mpsc::Receiver<ConfigChanged>,
    shutdown: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            () = shutdown.cancelled() => break,
            change = receiver.recv() => change,
        };
        let Some(ConfigChanged { config }) = change else { break };

        match lifecycle.handle_config_change(config).await {
            Ok(session_id) => info!(%session_id, "graph session restarted after config change"),
            Err(err) => error!(%err, "failed to restart graph session after config change"),
        }
    }
    lifecycle.stop_active().await;
}
