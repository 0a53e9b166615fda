//! External serverless functions runtime.

use std::sync::Arc;

use tracing::{info, warn};

use super::{FunctionsRuntime, ServiceFuture};
use crate::config::ServerSettings;
use crate::exports::EnvExports;
use crate::orchestrator::supervisor::CommandRunner;
use crate::{AppError, Result};

/// Environment variable naming the functions server executable.
pub const FUNCTIONS_SERVER_ENV: &str = "NETLIFY_FUNCTIONS_SERVER";

/// Launches the functions server named by [`FUNCTIONS_SERVER_ENV`].
#[derive(Clone)]
pub struct ExternalFunctionsRuntime {
    runner: Arc<dyn CommandRunner>,
    server: Option<String>,
}

impl std::fmt::Debug for ExternalFunctionsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalFunctionsRuntime")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl ExternalFunctionsRuntime {
    /// Runtime reading the server executable from the environment.
    #[must_use]
    pub fn from_env(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, std::env::var(FUNCTIONS_SERVER_ENV).ok())
    }

    /// Runtime launching `server`, or nothing when `None`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, server: Option<String>) -> Self {
        Self {
            runner,
            server: server.filter(|server| !server.is_empty()),
        }
    }

    /// Command line for `settings`, or `None` when there is nothing to run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if an argument cannot be quoted.
    pub fn command(&self, settings: &ServerSettings) -> Result<Option<String>> {
        let (Some(server), Some(functions)) = (&self.server, &settings.functions) else {
            return Ok(None);
        };
        let port = settings.functions_port.to_string();
        let functions = functions.display().to_string();
        shlex::try_join([server.as_str(), "--port", &port, "--functions", &functions])
            .map(Some)
            .map_err(|err| AppError::Process(format!("cannot quote functions command: {err}")))
    }
}

impl FunctionsRuntime for ExternalFunctionsRuntime {
    fn start<'a>(
        &'a self,
        settings: &'a ServerSettings,
        exports: &'a EnvExports,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            if settings.functions.is_none() {
                info!("no functions directory configured; functions runtime not started");
                return Ok(());
            }
            let Some(command) = self.command(settings)? else {
                warn!(
                    env = FUNCTIONS_SERVER_ENV,
                    "no functions server configured; functions will not be served"
                );
                return Ok(());
            };

            let mut env = exports.snapshot();
            env.extend(settings.env.clone());
            self.runner.run(&command, &env)?;
            info!(port = settings.functions_port, "functions runtime started");
            Ok(())
        })
    }
}
