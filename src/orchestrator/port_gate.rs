//! Port-readiness gate.
//!
//! Child commands are started fire-and-forget, so "child started" says
//! nothing about "service reachable". The gate polls a localhost port until
//! it accepts connections (optionally until it answers HTTP) or the timeout
//! elapses. It never blocks forever.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info_span, Instrument};

use crate::{AppError, Result};

/// Default time to wait for a framework server to come up.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Delay between two connection attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How a port is considered ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortProtocol {
    /// A TCP connection is accepted.
    #[default]
    Tcp,
    /// An HTTP request receives any response.
    Http,
}

/// Something that can block until a local port is ready.
pub trait ReadinessGate: Send + Sync {
    /// Wait until `port` is ready according to `protocol`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PortTimeout` when the port never became ready.
    fn wait<'a>(
        &'a self,
        port: u16,
        protocol: PortProtocol,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Polling gate over localhost TCP/HTTP.
#[derive(Debug, Clone)]
pub struct PortGate {
    host: String,
    timeout: Duration,
    interval: Duration,
    http: reqwest::Client,
}

impl Default for PortGate {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_TIMEOUT)
    }
}

impl PortGate {
    /// Gate polling `localhost` with the given overall timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            host: "localhost".into(),
            timeout,
            interval: POLL_INTERVAL,
            http: reqwest::Client::new(),
        }
    }

    /// Override the delay between attempts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Configured overall timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll until `port` is ready or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PortTimeout` with a "could not connect" message
    /// when the timeout elapses first.
    pub async fn wait_for_port(&self, port: u16, protocol: PortProtocol) -> Result<()> {
        let span = info_span!("wait_for_port", port, ?protocol);
        let poll = async {
            loop {
                if self.probe(port, protocol).await {
                    debug!("port is ready");
                    return;
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::time::timeout(self.timeout, poll.instrument(span))
            .await
            .map_err(|_elapsed| {
                AppError::PortTimeout(format!(
                    "could not connect to {}:{port} within {:?}",
                    self.host, self.timeout
                ))
            })
    }

    async fn probe(&self, port: u16, protocol: PortProtocol) -> bool {
        match protocol {
            PortProtocol::Tcp => matches!(
                tokio::time::timeout(
                    PROBE_TIMEOUT,
                    TcpStream::connect((self.host.as_str(), port))
                )
                .await,
                Ok(Ok(_))
            ),
            PortProtocol::Http => self
                .http
                .get(format!("http://{}:{port}/", self.host))
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
                .is_ok(),
        }
    }
}

impl ReadinessGate for PortGate {
    fn wait<'a>(
        &'a self,
        port: u16,
        protocol: PortProtocol,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.wait_for_port(port, protocol))
    }
}
