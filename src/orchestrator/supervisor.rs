//! Child process supervisor.
//!
//! Spawns one external command with its output forwarded to the
//! orchestrator's own streams, observes completion on a background task,
//! classifies the failure, and routes every exit into the cleanup registry.
//! The spawn call itself never fails because the child failed: spawn errors
//! and exit statuses are both inspected as a completed outcome.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupRegistry, FATAL_EXIT_CODE};
use crate::exports::EnvExports;
use crate::{AppError, Result};

/// Executables whose own error reporting is trusted verbatim.
pub const PACKAGE_MANAGERS: [&str; 2] = ["npm", "yarn"];

/// Grace period between SIGTERM and a forced kill during teardown.
const FORCE_KILL_AFTER: Duration = Duration::from_millis(500);

/// Upper bound on draining output after the child exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of trailing stderr lines kept for failure classification.
const STDERR_TAIL_LINES: usize = 20;

/// Cursor movement, screen clearing and bare C0 control characters.
/// SGR color sequences (`ESC[...m`) are kept.
const CONTROL_SEQUENCE_PATTERN: &str =
    r"\x1b\[[0-9;?]*[A-HJKSTfhlnsu]|\x1b[c78]|[\x00-\x08\x0B-\x1A\x1C-\x1F\x7F]";

/// Shell message printed when a command does not exist on Windows.
const NOT_RECOGNIZED_PATTERN: &str = r"(?i)is not recognized as an internal or external command";

/// Completed result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The OS refused to start the process.
    SpawnFailed {
        /// The platform reported a not-found error code.
        not_found: bool,
        /// Underlying error text.
        message: String,
    },
    /// The process ran and exited.
    Exited {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Trailing stderr output.
        stderr_tail: String,
    },
}

/// Classification of a finished child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildExit {
    /// The executable does not exist.
    NotFound {
        /// Executable as written in the command.
        executable: String,
    },
    /// The command failed to start or exited unsuccessfully.
    Failed {
        /// Short description of the failure.
        message: String,
    },
    /// The command exited successfully, which still ends the session.
    Exited {
        /// Exit code.
        code: i32,
    },
}

impl ChildExit {
    /// Operator-facing description of the exit.
    ///
    /// Only the executable of `command` is named; arguments may carry
    /// credentials and never reach the output.
    #[must_use]
    pub fn describe(&self, command: &str) -> String {
        match self {
            Self::NotFound { executable } => format!(
                "Failed running command: {executable}. Please verify '{executable}' exists"
            ),
            Self::Failed { message } => message.clone(),
            Self::Exited { code } => {
                format!("\"{}\" exited with code {code}", executable_name(command))
            }
        }
    }
}

/// Classify a completed command.
///
/// Not-found detection uses the platform error code, or the Windows
/// "not recognized" message, but is skipped entirely for package managers.
#[must_use]
pub fn classify_exit(command: &str, outcome: &CommandOutcome) -> ChildExit {
    let executable = executable_name(command);
    let trust_own_errors = is_package_manager(&executable);

    match outcome {
        CommandOutcome::SpawnFailed { not_found, message } => {
            if *not_found && !trust_own_errors {
                ChildExit::NotFound { executable }
            } else {
                ChildExit::Failed {
                    message: format!("Command failed with {message}: {executable}"),
                }
            }
        }
        CommandOutcome::Exited {
            code: Some(0),
            stderr_tail: _,
        } => ChildExit::Exited { code: 0 },
        CommandOutcome::Exited { code, stderr_tail } => {
            if !trust_own_errors && is_not_recognized(stderr_tail) {
                return ChildExit::NotFound { executable };
            }
            let message = code.map_or_else(
                || format!("Command was killed with a signal: {executable}"),
                |code| format!("Command failed with exit code {code}: {executable}"),
            );
            ChildExit::Failed { message }
        }
    }
}

/// First word of `command`, as the user wrote it.
#[must_use]
pub fn executable_name(command: &str) -> String {
    shlex::split(command)
        .and_then(|argv| argv.into_iter().next())
        .or_else(|| command.split_whitespace().next().map(str::to_owned))
        .unwrap_or_default()
}

fn is_package_manager(executable: &str) -> bool {
    Path::new(executable)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| PACKAGE_MANAGERS.contains(&stem))
}

fn is_not_recognized(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(NOT_RECOGNIZED_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Remove terminal control sequences from one line of child output.
#[must_use]
pub fn strip_control_sequences(line: &str) -> String {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    match PATTERN
        .get_or_init(|| Regex::new(CONTROL_SEQUENCE_PATTERN).ok())
        .as_ref()
    {
        Some(re) => re.replace_all(line, "").into_owned(),
        None => line.to_owned(),
    }
}

/// Starts user commands. The sequencer depends on this seam.
pub trait CommandRunner: Send + Sync {
    /// Start `command` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the command line cannot be parsed.
    fn run(&self, command: &str, env: &BTreeMap<String, String>) -> Result<()>;
}

/// Production runner backed by [`run_command`].
#[derive(Debug, Clone)]
pub struct SupervisedRunner {
    registry: CleanupRegistry,
    exports: EnvExports,
}

impl SupervisedRunner {
    /// Runner whose children report into `registry` and inherit `exports`.
    #[must_use]
    pub fn new(registry: CleanupRegistry, exports: EnvExports) -> Self {
        Self { registry, exports }
    }
}

impl CommandRunner for SupervisedRunner {
    fn run(&self, command: &str, env: &BTreeMap<String, String>) -> Result<()> {
        let mut merged = self.exports.snapshot();
        merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        run_command(command, &merged, &self.registry).map(|_observer| ())
    }
}

/// Spawn `command` and supervise it on a background task.
///
/// Returns the observer task handle. Completion of the child, successful
/// or not, triggers `run_once(1)` on `registry`. A teardown action that
/// stops the child is registered when the spawn succeeds.
///
/// # Errors
///
/// Returns `AppError::Process` if `command` is empty or badly quoted.
pub fn run_command(
    command: &str,
    env: &BTreeMap<String, String>,
    registry: &CleanupRegistry,
) -> Result<JoinHandle<()>> {
    let argv = shlex::split(command)
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| AppError::Process(format!("cannot parse command: {command:?}")))?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Process("empty command".into()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = prefer_local_path(env.get("PATH").map(String::as_str)) {
        cmd.env("PATH", path);
    }

    let command = command.to_owned();
    let registry = registry.clone();

    match cmd.spawn() {
        Err(err) => {
            debug!(%err, executable = %program, "failed to spawn command");
            let outcome = CommandOutcome::SpawnFailed {
                not_found: err.kind() == std::io::ErrorKind::NotFound,
                message: err.to_string(),
            };
            Ok(tokio::spawn(async move {
                report_exit(&command, &outcome, &registry).await;
            }))
        }
        Ok(child) => {
            info!(
                executable = %program,
                args = args.len(),
                pid = child.id().unwrap_or(0),
                "command started"
            );
            let stop = CancellationToken::new();
            let stopped = CancellationToken::new();
            {
                let stop = stop.clone();
                let stopped = stopped.clone();
                registry.register("stop child process", move || async move {
                    stop.cancel();
                    stopped.cancelled().await;
                    Ok(())
                });
            }
            Ok(tokio::spawn(supervise(
                command, child, stop, stopped, registry,
            )))
        }
    }
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

async fn supervise(
    command: String,
    mut child: Child,
    stop: CancellationToken,
    stopped: CancellationToken,
    registry: CleanupRegistry,
) {
    let tail: StderrTail = Arc::default();
    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(forward_output(stdout, tokio::io::stdout(), None)));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(forward_output(
            stderr,
            tokio::io::stderr(),
            Some(Arc::clone(&tail)),
        )));
    }

    let status = tokio::select! {
        status = child.wait() => status,
        () = stop.cancelled() => {
            terminate(&mut child).await;
            stopped.cancel();
            return;
        }
    };

    for forwarder in forwarders {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, forwarder)
            .await
            .is_err()
        {
            debug!(
                executable = %executable_name(&command),
                "output still open after exit; detaching forwarder"
            );
        }
    }
    stopped.cancel();

    let outcome = match status {
        Ok(status) => CommandOutcome::Exited {
            code: status.code(),
            stderr_tail: tail
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        },
        Err(err) => CommandOutcome::SpawnFailed {
            not_found: false,
            message: err.to_string(),
        },
    };
    report_exit(&command, &outcome, &registry).await;
}

async fn report_exit(command: &str, outcome: &CommandOutcome, registry: &CleanupRegistry) {
    let exit = classify_exit(command, outcome);
    let message = exit.describe(command);
    match exit {
        ChildExit::NotFound { ref executable } => error!(%executable, "{message}"),
        ChildExit::Failed { .. } => error!("{message}"),
        ChildExit::Exited { .. } => warn!("{message}"),
    }
    info!("shutting down dev server");
    registry.run_once(FATAL_EXIT_CODE).await;
}

async fn forward_output<R, W>(reader: R, mut writer: W, tail: Option<StderrTail>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let clean = strip_control_sequences(&line);
                if writer.write_all(clean.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                {
                    break;
                }
                let _ = writer.flush().await;
                if let Some(tail) = &tail {
                    let mut guard = tail
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if guard.len() == STDERR_TAIL_LINES {
                        guard.pop_front();
                    }
                    guard.push_back(clean);
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "child output stream failed");
                break;
            }
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(%err, pid, "failed to send SIGTERM");
            }
            if tokio::time::timeout(FORCE_KILL_AFTER, child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
    }

    if let Err(err) = child.kill().await {
        warn!(%err, "failed to force-kill child process");
    }
}

/// `PATH` with `<cwd>/node_modules/.bin` prepended.
fn prefer_local_path(base: Option<&str>) -> Option<std::ffi::OsString> {
    let local_bin: PathBuf = std::env::current_dir().ok()?.join("node_modules").join(".bin");
    let base = base.map_or_else(|| std::env::var_os("PATH").unwrap_or_default(), Into::into);
    let paths = std::iter::once(local_bin).chain(std::env::split_paths(&base));
    std::env::join_paths(paths).ok()
}
