//! Process-wide once-only teardown registry.
//!
//! Components register asynchronous teardown actions with a shared
//! [`CleanupRegistry`]. Any failure source (a supervised child exiting, a
//! readiness timeout, a proxy bind failure, an interrupt signal) may call
//! [`CleanupRegistry::run_once`]; the first caller wins, runs every
//! registered action concurrently, then terminates the process. Later
//! callers are no-ops.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::Result;

/// Exit code used for every fatal orchestration failure.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Boxed future produced by a teardown action.
pub type CleanupFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A zero-argument asynchronous teardown action.
pub type CleanupTask = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Action invoked with the exit code once teardown has finished.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

struct NamedTask {
    name: &'static str,
    task: CleanupTask,
}

struct Inner {
    tasks: Mutex<Vec<NamedTask>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    finished: CancellationToken,
    exit: ExitHook,
}

/// Shared handle to the teardown registry. Cloning is cheap.
#[derive(Clone)]
pub struct CleanupRegistry {
    inner: Arc<Inner>,
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("started", &self.has_started())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl CleanupRegistry {
    /// Create a registry that terminates the process when teardown finishes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_exit_hook(Arc::new(|code| std::process::exit(code)))
    }

    /// Create a registry with a custom termination action.
    ///
    /// Tests use this to observe the exit code instead of exiting.
    #[must_use]
    pub fn with_exit_hook(exit: ExitHook) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                finished: CancellationToken::new(),
                exit,
            }),
        }
    }

    /// Append a teardown action.
    ///
    /// Actions registered after teardown has started are dropped.
    pub fn register<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = self.lock_tasks();
        if self.has_started() {
            warn!(task = name, "teardown already started; dropping cleanup task");
            return;
        }
        let boxed: CleanupTask = Box::new(move || Box::pin(task()));
        tasks.push(NamedTask { name, task: boxed });
        drop(tasks);
        debug!(task = name, "cleanup task registered");
    }

    /// Run every registered action exactly once, then terminate with
    /// `exit_code`.
    ///
    /// Returns `true` for the caller that performed teardown. Any other
    /// caller returns `false` once that teardown has finished; in
    /// production the winner exits the process before that happens.
    pub async fn run_once(&self, exit_code: i32) -> bool {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(exit_code, "teardown already in progress");
            self.inner.finished.cancelled().await;
            return false;
        }

        self.inner.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let span = info_span!("cleanup", exit_code, tasks = tasks.len());

        async {
            info!("running cleanup tasks");
            let handles: Vec<_> = tasks
                .into_iter()
                .map(|NamedTask { name, task }| (name, tokio::spawn(task())))
                .collect();
            let (names, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();

            for (name, outcome) in names.into_iter().zip(join_all(joins).await) {
                match outcome {
                    Ok(Ok(())) => debug!(task = name, "cleanup task finished"),
                    Ok(Err(err)) => error!(task = name, %err, "cleanup task failed"),
                    Err(err) => error!(task = name, %err, "cleanup task panicked"),
                }
            }
            info!("cleanup complete");
        }
        .instrument(span)
        .await;

        self.inner.finished.cancel();
        (self.inner.exit)(exit_code);
        true
    }

    /// Whether teardown has begun.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Number of registered actions still waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Token cancelled as soon as teardown begins.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Wait until a teardown pass has run to completion.
    pub async fn finished(&self) {
        self.inner.finished.cancelled().await;
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<NamedTask>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
