//! Public live tunnel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{LiveTunnel, ServiceFuture, TunnelParams};
use crate::api::NetlifyApi;
use crate::orchestrator::supervisor::CommandRunner;
use crate::{AppError, Result};

/// Environment variable naming the tunnel client executable.
pub const TUNNEL_CLIENT_ENV: &str = "NETLIFY_LIVE_TUNNEL_CLIENT";

/// Environment variable carrying the access token into the tunnel client.
pub const TUNNEL_TOKEN_ENV: &str = "NETLIFY_AUTH_TOKEN";

const DEFAULT_TUNNEL_CLIENT: &str = "live-tunnel-client";
const ONLINE_TIMEOUT: Duration = Duration::from_secs(30);
const ONLINE_POLL: Duration = Duration::from_secs(1);

/// [`LiveTunnel`] backed by API live sessions and the tunnel client.
#[derive(Clone)]
pub struct NetlifyLiveTunnel {
    api_url: String,
    runner: Arc<dyn CommandRunner>,
    client: String,
    poll: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for NetlifyLiveTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlifyLiveTunnel")
            .field("api_url", &self.api_url)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl NetlifyLiveTunnel {
    /// Tunnel talking to the API at `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            api_url: api_url.into(),
            runner,
            client: std::env::var(TUNNEL_CLIENT_ENV)
                .unwrap_or_else(|_| DEFAULT_TUNNEL_CLIENT.into()),
            poll: ONLINE_POLL,
            timeout: ONLINE_TIMEOUT,
        }
    }

    /// Override how often and how long to wait for the session to go online.
    #[must_use]
    pub fn with_polling(mut self, poll: Duration, timeout: Duration) -> Self {
        self.poll = poll;
        self.timeout = timeout;
        self
    }

    async fn open(&self, params: &TunnelParams) -> Result<String> {
        let api = NetlifyApi::new(self.api_url.clone(), Some(params.token.clone()));
        let session = api.create_live_session(&params.site_id).await?;
        info!(session_id = %session.id, "live session created");

        let command = tunnel_command(&self.client, &session.id, params.local_port)?;
        let env = BTreeMap::from([(TUNNEL_TOKEN_ENV.to_owned(), params.token.clone())]);
        self.runner.run(&command, &env)?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let current = api.get_live_session(&session.id).await?;
            if current.is_online() {
                info!(url = %current.session_url, "live tunnel online");
                return Ok(current.session_url);
            }
            debug!(state = ?current.state, "waiting for live tunnel");
            if tokio::time::Instant::now() + self.poll > deadline {
                return Err(AppError::Api(format!(
                    "live session {} did not come online within {:?}",
                    session.id, self.timeout
                )));
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Command line for the tunnel client. The token travels in
/// [`TUNNEL_TOKEN_ENV`], never on the command line.
///
/// # Errors
///
/// Returns `AppError::Process` if an argument cannot be quoted.
pub fn tunnel_command(client: &str, session_id: &str, port: u16) -> Result<String> {
    let port = port.to_string();
    shlex::try_join([client, "-s", session_id, "-p", &port])
        .map_err(|err| AppError::Process(format!("cannot quote tunnel command: {err}")))
}

impl LiveTunnel for NetlifyLiveTunnel {
    fn start<'a>(&'a self, params: &'a TunnelParams) -> ServiceFuture<'a, String> {
        Box::pin(self.open(params))
    }
}
