//! Debounced watcher for the site configuration file.
//!
//! [`ConfigWatchHandle`] uses the `notify` crate to watch the directory
//! containing the config file (non-recursive, so only shallow changes are
//! seen) and filters events down to the config file itself. Raw events are
//! coalesced over a debounce window on a tokio task; each settled burst
//! reloads and normalizes the configuration and hands a [`ConfigChanged`]
//! to the single consumer on an `mpsc` channel.
//!
//! The handle owns the OS watch. Dropping or closing it stops delivery.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::{AppError, Result};

/// Default quiet period before a burst of file events is acted on.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Reloads and normalizes the configuration at a path.
pub type ConfigLoader = Arc<dyn Fn(&Path) -> Result<GraphConfig> + Send + Sync>;

/// Notification carrying the freshly normalized configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChanged {
    /// Normalized configuration after the change.
    pub config: GraphConfig,
}

/// Owner of the config file watch subscription.
pub struct ConfigWatchHandle {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConfigWatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatchHandle")
            .field("path", &self.path)
            .field("open", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl ConfigWatchHandle {
    /// Start watching `config_path`, delivering debounced reloads to `tx`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if the OS watcher cannot be created or the
    /// containing directory cannot be watched.
    pub fn spawn(
        config_path: &Path,
        debounce: Duration,
        loader: ConfigLoader,
        tx: mpsc::Sender<ConfigChanged>,
    ) -> Result<Self> {
        let file_name = config_path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| {
                AppError::Watch(format!("not a file path: {}", config_path.display()))
            })?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_event(&event, &file_name) => {
                    let _ = raw_tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "config file watcher error"),
            },
        )
        .map_err(|err| AppError::Watch(format!("failed to create config file watcher: {err}")))?;

        // Watch the directory (not the file) so rename-based saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Watch(format!(
                    "failed to watch '{}': {err}",
                    watch_target.display()
                ))
            })?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reload_loop(
            config_path.to_path_buf(),
            debounce,
            loader,
            raw_rx,
            tx,
            cancel.clone(),
        ));

        info!(path = %config_path.display(), "watching site config for changes");
        Ok(Self {
            path: config_path.to_path_buf(),
            watcher: Some(watcher),
            cancel,
            task: Some(task),
        })
    }

    /// Watched config file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the OS watch and the reload task.
    pub async fn close(mut self) {
        self.watcher.take();
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "config reload task ended abnormally");
            }
        }
        info!(path = %self.path.display(), "config watcher closed");
    }
}

impl Drop for ConfigWatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    loader: ConfigLoader,
    mut raw_rx: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<ConfigChanged>,
    cancel: CancellationToken,
) {
    loop {
        let burst = tokio::select! {
            () = cancel.cancelled() => break,
            burst = debounce_events(&mut raw_rx, debounce) => burst,
        };
        let Some(events) = burst else { break };
        debug!(events, "config change settled");

        let load = {
            let loader = Arc::clone(&loader);
            let path = path.clone();
            tokio::task::spawn_blocking(move || loader(&path))
        };
        let loaded = load
            .await
            .unwrap_or_else(|err| Err(AppError::Watch(format!("config reload task failed: {err}"))));
        match loaded {
            Ok(config) => {
                info!(path = %path.display(), "site config changed");
                if tx.send(ConfigChanged { config }).await.is_err() {
                    debug!("config change consumer gone; stopping reload loop");
                    break;
                }
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "failed to reload site config; keeping previous values");
            }
        }
    }
}

/// Wait for one event, then keep absorbing events until none arrives for
/// `window`. Returns how many events were coalesced, or `None` once the
/// channel is closed with nothing pending.
pub async fn debounce_events<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    window: Duration,
) -> Option<usize> {
    rx.recv().await?;
    let mut events = 1;
    loop {
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(_)) => events += 1,
            Ok(None) | Err(_) => return Some(events),
        }
    }
}

fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|name| name == file_name.as_os_str()))
}
