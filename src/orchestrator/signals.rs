//! Process-exit signal handling.

use tokio::task::JoinHandle;
use tracing::info;

use crate::cleanup::CleanupRegistry;

/// Spawn a task that runs the cleanup registry with exit code `0` when the
/// process receives an interrupt or termination signal.
///
/// Handlers are registered before this returns, so a signal delivered right
/// after the call is not lost.
#[must_use]
pub fn spawn_signal_handler(registry: CleanupRegistry) -> JoinHandle<()> {
    let signals = ShutdownSignals::install();
    tokio::spawn(async move {
        let shutdown = registry.shutdown_token();
        tokio::select! {
            () = signals.recv() => {
                info!("shutdown signal received");
                registry.run_once(0).await;
            }
            () = shutdown.cancelled() => {}
        }
    })
}

#[cfg(unix)]
struct ShutdownSignals(Vec<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            ("interrupt", SignalKind::interrupt()),
            ("terminate", SignalKind::terminate()),
            ("hangup", SignalKind::hangup()),
            ("quit", SignalKind::quit()),
        ];
        let streams = kinds
            .into_iter()
            .filter_map(|(name, kind)| match signal(kind) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    tracing::warn!(%err, signal = name, "failed to register signal handler");
                    None
                }
            })
            .collect();
        Self(streams)
    }

    async fn recv(mut self) {
        if self.0.is_empty() {
            return std::future::pending().await;
        }
        let waits = self.0.iter_mut().map(|stream| Box::pin(stream.recv()));
        futures_util::future::select_all(waits).await;
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Self {
        Self
    }

    async fn recv(self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "ctrl-c signal handler failed");
            std::future::pending::<()>().await;
        }
    }
}
