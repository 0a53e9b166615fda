//! Request routing front-ends.
//!
//! The reverse proxy is an `axum` server that forwards every request with
//! `reqwest`: `/.netlify/functions/*` goes to the functions runtime,
//! `/.netlify/<addon>/*` to the add-on's URL and everything else to the
//! framework server. The forward proxy is an external agent process.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ForwardProxyParams, ProxyParams, ProxyServer, ServiceFuture};
use crate::cleanup::CleanupRegistry;
use crate::orchestrator::port_gate::{PortProtocol, ReadinessGate};
use crate::orchestrator::supervisor::CommandRunner;
use crate::{AppError, Result};

/// Environment variable naming the forward proxy agent executable.
pub const MESH_AGENT_ENV: &str = "NETLIFY_TRAFFIC_MESH_AGENT";

const DEFAULT_MESH_AGENT: &str = "traffic-mesh-agent";
const FUNCTIONS_PREFIX: &str = "/.netlify/functions/";
const ADDON_PREFIX: &str = "/.netlify/";
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// [`ProxyServer`] implementation used by the binary.
#[derive(Clone)]
pub struct LocalProxy {
    runner: Arc<dyn CommandRunner>,
    gate: Arc<dyn ReadinessGate>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for LocalProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProxy").finish_non_exhaustive()
    }
}

impl LocalProxy {
    /// Proxy that launches helpers with `runner`, waits on them with
    /// `gate` and stops serving when `registry` tears down.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        gate: Arc<dyn ReadinessGate>,
        registry: &CleanupRegistry,
    ) -> Self {
        Self {
            runner,
            gate,
            shutdown: registry.shutdown_token(),
        }
    }

    async fn reverse(&self, params: &ProxyParams) -> Option<String> {
        let bind = SocketAddr::from(([127, 0, 0, 1], params.port));
        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(%err, %bind, "failed to bind proxy");
                return None;
            }
        };

        let state = match Routes::new(params) {
            Ok(routes) => Arc::new(routes),
            Err(err) => {
                error!(%err, "failed to build proxy client");
                return None;
            }
        };
        let app = Router::new().fallback(forward).with_state(state);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match served {
                Ok(()) => debug!("proxy shut down"),
                Err(err) => warn!(%err, "proxy server error"),
            }
        });

        info!(%bind, framework_port = params.framework_port, "proxy listening");
        Some(format!("http://localhost:{}", params.port))
    }

    async fn forward_agent(&self, params: &ForwardProxyParams) -> Result<()> {
        let agent = std::env::var(MESH_AGENT_ENV).unwrap_or_else(|_| DEFAULT_MESH_AGENT.into());
        let command = mesh_agent_command(&agent, params)?;
        self.runner.run(&command, &BTreeMap::new())?;
        self.gate.wait(params.port, PortProtocol::Tcp).await
    }
}

impl ProxyServer for LocalProxy {
    fn start_proxy<'a>(&'a self, params: &'a ProxyParams) -> ServiceFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.reverse(params).await) })
    }

    fn start_forward_proxy<'a>(
        &'a self,
        params: &'a ForwardProxyParams,
    ) -> ServiceFuture<'a, Option<String>> {
        Box::pin(async move {
            match self.forward_agent(params).await {
                Ok(()) => Ok(Some(format!("http://localhost:{}", params.port))),
                Err(err) => {
                    error!(%err, "forward proxy did not start");
                    Ok(None)
                }
            }
        })
    }
}

/// Command line launching the forward proxy agent.
///
/// # Errors
///
/// Returns `AppError::Process` if an argument cannot be quoted.
pub fn mesh_agent_command(agent: &str, params: &ForwardProxyParams) -> Result<String> {
    let mut argv = vec![
        agent.to_owned(),
        "--port".into(),
        params.port.to_string(),
        "--forward-proxy".into(),
        format!("http://localhost:{}", params.framework_port),
        "--functions-port".into(),
        params.functions_port.to_string(),
        "--watch".into(),
        params.config_path.display().to_string(),
        "--public".into(),
        params.publish_dir.display().to_string(),
    ];
    if let Some(geo_db) = &params.geo_db {
        argv.extend(["--geo-db".into(), geo_db.display().to_string()]);
    }
    if let Some(secret) = &params.jwt_secret {
        argv.extend(["--jwt-secret".into(), secret.clone()]);
    }
    if let Some(role_path) = &params.jwt_role_path {
        argv.extend(["--jwt-role-path".into(), role_path.clone()]);
    }
    shlex::try_join(argv.iter().map(String::as_str))
        .map_err(|err| AppError::Process(format!("cannot quote forward proxy command: {err}")))
}

/// Upstream selection for the reverse proxy.
#[derive(Debug)]
pub struct Routes {
    http: reqwest::Client,
    framework: String,
    functions: String,
    addons: BTreeMap<String, String>,
}

impl Routes {
    /// Routes for `params`. Upstream redirects are passed to the browser
    /// untouched, never followed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProxyBind` if the HTTP client cannot be built.
    pub fn new(params: &ProxyParams) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| AppError::ProxyBind(format!("cannot build proxy client: {err}")))?;
        Ok(Self {
            http,
            framework: format!("http://localhost:{}", params.framework_port),
            functions: format!("http://localhost:{}", params.functions_port),
            addons: params
                .addons_urls
                .iter()
                .map(|(slug, url)| (slug.clone(), url.trim_end_matches('/').to_owned()))
                .collect(),
        })
    }

    /// Upstream URL for a request path (with query).
    #[must_use]
    pub fn upstream(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with(FUNCTIONS_PREFIX) {
            return format!("{}{path_and_query}", self.functions);
        }
        if let Some(rest) = path_and_query.strip_prefix(ADDON_PREFIX) {
            let (slug, tail) = rest.split_once('/').unwrap_or((rest, ""));
            if let Some(base) = self.addons.get(slug) {
                return format!("{base}/{tail}");
            }
        }
        format!("{}{path_and_query}", self.framework)
    }
}

async fn forward(State(routes): State<Arc<Routes>>, request: Request) -> Response {
    match proxy_request(&routes, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "proxy request failed");
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}

async fn proxy_request(routes: &Routes, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", axum::http::uri::PathAndQuery::as_str);
    let target = routes.upstream(path_and_query);
    debug!(method = %parts.method, %target, "proxying request");

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| AppError::Io(format!("failed to read request body: {err}")))?;
    let upstream = routes
        .http
        .request(parts.method, &target)
        .headers(strip_hop_headers(parts.headers))
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let headers = strip_hop_headers(upstream.headers().clone());
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in [
        header::HOST,
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::CONTENT_LENGTH,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
    headers
}
